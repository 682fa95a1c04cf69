//! Library file reading and writing.
//!
//! The merge engine works on [`RecordCollection`]s; turning file bytes into
//! a collection and back is delegated to a [`LibraryCodec`]. The bundled
//! [`JsonLibraryCodec`] stores a collection as pretty-printed JSON.

use std::path::Path;

use tracing::debug;

use crate::errors::CodecError;
use crate::model::RecordCollection;

/// Reader/writer for one library file format.
pub trait LibraryCodec {
    /// Parse file content. Empty content is an empty collection.
    fn parse(&self, content: &[u8]) -> Result<RecordCollection, CodecError>;

    /// Serialize a collection to the exact bytes to write to disk.
    fn serialize(&self, library: &RecordCollection) -> Result<Vec<u8>, CodecError>;

    fn read_file(&self, path: &Path) -> Result<RecordCollection, CodecError> {
        let content = std::fs::read(path)?;
        debug!(path = %path.display(), bytes = content.len(), "read library file");
        self.parse(&content)
    }

    fn write_file(&self, path: &Path, library: &RecordCollection) -> Result<(), CodecError> {
        let content = self.serialize(library)?;
        std::fs::write(path, &content)?;
        debug!(path = %path.display(), bytes = content.len(), "wrote library file");
        Ok(())
    }
}

/// JSON library format.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLibraryCodec;

impl LibraryCodec for JsonLibraryCodec {
    fn parse(&self, content: &[u8]) -> Result<RecordCollection, CodecError> {
        if content.iter().all(u8::is_ascii_whitespace) {
            return Ok(RecordCollection::new());
        }
        serde_json::from_slice(content).map_err(|e| CodecError::Parse(e.to_string()))
    }

    fn serialize(&self, library: &RecordCollection) -> Result<Vec<u8>, CodecError> {
        let mut out =
            serde_json::to_vec_pretty(library).map_err(|e| CodecError::Serialize(e.to_string()))?;
        out.push(b'\n');
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Record;

    #[test]
    fn test_empty_content_is_empty_library() {
        assert!(JsonLibraryCodec.parse(b"").unwrap().is_empty());
        assert!(JsonLibraryCodec.parse(b"  \n").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            JsonLibraryCodec.parse(b"@article{a,"),
            Err(CodecError::Parse(_))
        ));
    }

    #[test]
    fn test_file_roundtrip_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("library.json");
        let library = RecordCollection::from_records([
            Record::with_key("article", "a").field("title", "T"),
        ]);

        JsonLibraryCodec.write_file(&path, &library).unwrap();
        let first = std::fs::read(&path).unwrap();
        let parsed = JsonLibraryCodec.read_file(&path).unwrap();
        assert_eq!(parsed, library);
        assert_eq!(JsonLibraryCodec.serialize(&parsed).unwrap(), first);
        assert!(first.ends_with(b"\n"));
    }
}
