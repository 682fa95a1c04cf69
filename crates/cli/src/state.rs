//! Saved state of a pull that stopped on conflicts.
//!
//! Stored as JSON at `<git dir>/bibsync/pull-state.json` so it never shows
//! up in the working tree.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use bibsync_core::pull::PullComputation;

const STATE_DIR: &str = "bibsync";
const STATE_FILE: &str = "pull-state.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullState {
    pub saved_at: DateTime<Utc>,
    /// Library file the pull was started for.
    pub file: PathBuf,
    pub pull: PullComputation,
}

impl PullState {
    pub fn new(file: PathBuf, pull: PullComputation) -> Self {
        Self {
            saved_at: Utc::now(),
            file,
            pull,
        }
    }
}

pub fn state_path(git_dir: &Path) -> PathBuf {
    git_dir.join(STATE_DIR).join(STATE_FILE)
}

pub fn save(git_dir: &Path, state: &PullState) -> Result<PathBuf> {
    let path = state_path(git_dir);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_vec_pretty(state).context("failed to serialize pull state")?;
    std::fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
    debug!(path = %path.display(), "pull state saved");
    Ok(path)
}

/// The saved state, or `None` when no pull is in progress.
pub fn load(git_dir: &Path) -> Result<Option<PullState>> {
    let path = state_path(git_dir);
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    let state = serde_json::from_slice(&bytes)
        .with_context(|| format!("corrupt pull state at {}", path.display()))?;
    Ok(Some(state))
}

pub fn clear(git_dir: &Path) -> Result<()> {
    let path = state_path(git_dir);
    match std::fs::remove_file(&path) {
        Ok(()) => {
            debug!(path = %path.display(), "pull state cleared");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("failed to remove {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bibsync_core::git::CommitId;
    use bibsync_core::merge::MergeAnalysis;
    use bibsync_core::model::{Record, RecordCollection};

    fn sample() -> PullState {
        let library = RecordCollection::from_records([
            Record::with_key("article", "k").field("title", "T"),
        ]);
        PullState::new(
            PathBuf::from("/work/lib.json"),
            PullComputation {
                path: PathBuf::from("lib.json"),
                remote_ref: "refs/remotes/origin/main".into(),
                local_head: CommitId::new("aaaa"),
                remote: CommitId::new("bbbb"),
                base: None,
                base_library: RecordCollection::new(),
                local_library: library.clone(),
                remote_library: library,
                analysis: MergeAnalysis::default(),
            },
        )
    }

    #[test]
    fn test_save_load_clear() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(dir.path()).unwrap().is_none());

        let state = sample();
        let path = save(dir.path(), &state).unwrap();
        assert!(path.ends_with("bibsync/pull-state.json"));

        let loaded = load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.pull, state.pull);
        assert_eq!(loaded.file, state.file);

        clear(dir.path()).unwrap();
        assert!(load(dir.path()).unwrap().is_none());
        clear(dir.path()).unwrap();
    }

    #[test]
    fn test_corrupt_state_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(STATE_DIR)).unwrap();
        std::fs::write(state_path(dir.path()), b"{not json").unwrap();
        assert!(load(dir.path()).is_err());
    }
}
