//! Pull preparation: gather the three snapshots of one library file and
//! analyze them.
//!
//! The resulting [`PullComputation`] is the state a later finalize must see
//! unchanged; it is serializable so a pull interrupted by conflicts can be
//! resumed after the user resolved them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::codec::LibraryCodec;
use crate::errors::{CodecError, SyncError};
use crate::git::{CommitId, GitRepository, RepositoryProvider};
use crate::merge::{MergeAnalysis, MergePlanner};
use crate::model::RecordCollection;

/// Everything captured when a pull was prepared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullComputation {
    /// Library file path relative to the repository root.
    pub path: PathBuf,
    pub remote_ref: String,
    /// HEAD when the pull was prepared.
    pub local_head: CommitId,
    pub remote: CommitId,
    /// Merge base of `local_head` and `remote`, if the histories share one.
    pub base: Option<CommitId>,
    pub base_library: RecordCollection,
    pub local_library: RecordCollection,
    pub remote_library: RecordCollection,
    pub analysis: MergeAnalysis,
}

impl PullComputation {
    /// Remote has nothing local lacks.
    pub fn is_up_to_date(&self) -> bool {
        self.base.as_ref() == Some(&self.remote)
    }

    /// The merged library when the analysis has no conflicts.
    pub fn merged_library(&self) -> Option<RecordCollection> {
        if self.analysis.has_conflicts() {
            return None;
        }
        let mut merged = self.local_library.clone();
        crate::merge::PlanApplier::apply_all(&mut merged, &self.analysis.plan);
        Some(merged)
    }
}

/// Repository containing `file` and the file's path relative to its root.
pub(crate) fn locate<P: RepositoryProvider>(
    provider: &P,
    file: &Path,
) -> Result<(P::Repo, PathBuf), SyncError> {
    let repo = provider
        .open_containing(file)?
        .ok_or_else(|| SyncError::NotAGitRepository {
            path: file.display().to_string(),
        })?;

    let root = canonical(repo.workdir())?;
    let absolute = canonical(file)?;
    let relative = absolute
        .strip_prefix(&root)
        .map_err(|_| SyncError::PathOutsideRepository {
            path: file.display().to_string(),
            root: root.display().to_string(),
        })?
        .to_path_buf();
    debug!(root = %root.display(), path = %relative.display(), "located library in repository");
    Ok((repo, relative))
}

/// Canonical form of `path`, tolerating a missing final component.
fn canonical(path: &Path) -> std::io::Result<PathBuf> {
    match path.canonicalize() {
        Ok(path) => Ok(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            match (path.parent(), path.file_name()) {
                (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => {
                    Ok(parent.canonicalize()?.join(name))
                }
                _ => Err(e),
            }
        }
        Err(e) => Err(e),
    }
}

fn parse_blob<C: LibraryCodec>(
    codec: &C,
    blob: Option<Vec<u8>>,
) -> Result<RecordCollection, CodecError> {
    match blob {
        Some(bytes) => codec.parse(&bytes),
        None => Ok(RecordCollection::new()),
    }
}

/// Read base, local and remote versions of `file` and analyze them.
///
/// Base and remote come from commits; a path absent there is an empty
/// library. Local is read from disk, so unsaved edits are excluded but
/// uncommitted on-disk edits are included.
#[instrument(skip(provider, codec, file), fields(file = %file.display()))]
pub fn prepare_pull<P, C>(
    provider: &P,
    codec: &C,
    file: &Path,
    remote_ref: &str,
) -> Result<PullComputation, SyncError>
where
    P: RepositoryProvider,
    C: LibraryCodec,
{
    let (repo, path) = locate(provider, file)?;

    let local_head = repo.head()?;
    let remote = repo.resolve_ref(remote_ref)?;
    let base = repo.merge_base(&local_head, &remote)?;

    let base_library = match &base {
        Some(base) => parse_blob(codec, repo.read_blob_at_commit(base, &path)?)?,
        None => RecordCollection::new(),
    };
    let remote_library = parse_blob(codec, repo.read_blob_at_commit(&remote, &path)?)?;
    let local_library = match std::fs::read(repo.workdir().join(&path)) {
        Ok(bytes) => codec.parse(&bytes)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => RecordCollection::new(),
        Err(e) => return Err(e.into()),
    };

    let analysis = MergePlanner::analyze(&base_library, &local_library, &remote_library);

    info!(
        local_head = %local_head.short(),
        remote = %remote.short(),
        base = base.as_ref().map(CommitId::short).unwrap_or("none"),
        conflicts = analysis.conflicts.len(),
        "pull prepared"
    );

    Ok(PullComputation {
        path,
        remote_ref: remote_ref.to_string(),
        local_head,
        remote,
        base,
        base_library,
        local_library,
        remote_library,
        analysis,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonLibraryCodec;
    use crate::git::{MemoryProvider, MemoryRepository};
    use crate::model::Record;

    const REMOTE: &str = "refs/remotes/origin/main";

    fn encode(records: Vec<Record>) -> Vec<u8> {
        JsonLibraryCodec
            .serialize(&RecordCollection::from_records(records))
            .unwrap()
    }

    #[test]
    fn test_prepare_reads_three_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let repo = MemoryRepository::new(dir.path());

        let base = encode(vec![Record::with_key("article", "a").field("title", "A")]);
        let local = encode(vec![
            Record::with_key("article", "a").field("title", "A"),
            Record::with_key("article", "l").field("title", "L"),
        ]);
        let remote = encode(vec![Record::with_key("article", "a").field("title", "B")]);

        let c0 = repo.commit_files(&[], &[("lib.json", base.as_slice())], "base");
        let c1 = repo.commit_files(&[c0.clone()], &[("lib.json", local.as_slice())], "local");
        let c2 = repo.commit_files(&[c0.clone()], &[("lib.json", remote.as_slice())], "remote");
        repo.checkout(&c1).unwrap();
        repo.set_ref(REMOTE, &c2);
        std::fs::write(dir.path().join("lib.json"), &local).unwrap();

        let provider = MemoryProvider::new(repo);
        let pull = prepare_pull(
            &provider,
            &JsonLibraryCodec,
            &dir.path().join("lib.json"),
            REMOTE,
        )
        .unwrap();

        assert_eq!(pull.path, PathBuf::from("lib.json"));
        assert_eq!(pull.local_head, c1);
        assert_eq!(pull.remote, c2);
        assert_eq!(pull.base, Some(c0));
        assert_eq!(pull.local_library.len(), 2);
        assert!(!pull.is_up_to_date());
        assert!(!pull.analysis.has_conflicts());

        let merged = pull.merged_library().unwrap();
        assert_eq!(merged.find("a").unwrap().get(&"title".into()), Some("B"));
        assert!(merged.find("l").is_some());
    }

    #[test]
    fn test_file_missing_from_remote_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let repo = MemoryRepository::new(dir.path());
        let c0 = repo.commit_files(&[], &[("other.txt", b"x".as_slice())], "init");
        repo.checkout(&c0).unwrap();
        repo.set_ref(REMOTE, &c0);

        let provider = MemoryProvider::new(repo);
        let pull = prepare_pull(
            &provider,
            &JsonLibraryCodec,
            &dir.path().join("lib.json"),
            REMOTE,
        )
        .unwrap();
        assert!(pull.remote_library.is_empty());
        assert!(pull.local_library.is_empty());
        assert!(pull.is_up_to_date());
        assert!(pull.analysis.plan.is_empty());
    }

    #[test]
    fn test_outside_any_repository() {
        let dir = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let provider = MemoryProvider::new(MemoryRepository::new(dir.path()));
        let err = prepare_pull(
            &provider,
            &JsonLibraryCodec,
            &elsewhere.path().join("lib.json"),
            REMOTE,
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::NotAGitRepository { .. }));
    }

    #[test]
    fn test_computation_serializes() {
        let dir = tempfile::tempdir().unwrap();
        let repo = MemoryRepository::new(dir.path());
        let c0 = repo.commit_files(&[], &[("lib.json", b"".as_slice())], "init");
        repo.checkout(&c0).unwrap();
        repo.set_ref(REMOTE, &c0);
        let provider = MemoryProvider::new(repo);
        let pull = prepare_pull(
            &provider,
            &JsonLibraryCodec,
            &dir.path().join("lib.json"),
            REMOTE,
        )
        .unwrap();

        let json = serde_json::to_string(&pull).unwrap();
        let back: PullComputation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pull);
    }
}
