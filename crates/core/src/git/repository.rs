//! The narrow repository interface the sync engine is written against.
//!
//! Everything the bookkeeping needs from git goes through [`GitRepository`],
//! so the same logic runs against a real repository ([`super::Git2Repository`])
//! and the in-memory fake ([`super::MemoryRepository`]).

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::GitError;

/// Hex id of a commit object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(String);

impl CommitId {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated id for display.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hex id of a tree object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TreeId(String);

impl TreeId {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of a compare-and-swap ref update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefUpdateOutcome {
    FastForward,
    New,
    Forced,
    NoChange,
    Renamed,
    /// The ref did not hold the expected old value.
    LockFailure,
    Rejected,
}

impl RefUpdateOutcome {
    pub fn is_success(self) -> bool {
        matches!(
            self,
            Self::FastForward | Self::New | Self::Forced | Self::NoChange | Self::Renamed
        )
    }
}

impl fmt::Display for RefUpdateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FastForward => write!(f, "fast_forward"),
            Self::New => write!(f, "new"),
            Self::Forced => write!(f, "forced"),
            Self::NoChange => write!(f, "no_change"),
            Self::Renamed => write!(f, "renamed"),
            Self::LockFailure => write!(f, "lock_failure"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// Repository primitives used by pull preparation and commit bookkeeping.
///
/// Paths passed in are relative to [`workdir`](Self::workdir).
pub trait GitRepository {
    /// Root of the working tree.
    fn workdir(&self) -> &Path;

    /// Commit HEAD currently points at.
    fn head(&self) -> Result<CommitId, GitError>;

    /// Full name of the branch HEAD points at, e.g. `refs/heads/main`.
    fn head_ref_name(&self) -> Result<String, GitError>;

    /// Resolve a ref name or revision to a commit.
    fn resolve_ref(&self, name: &str) -> Result<CommitId, GitError>;

    /// Stage one working-tree path into the index.
    fn stage_path(&self, path: &Path) -> Result<(), GitError>;

    /// Reset the index entry for `path` to its state in `commit`, removing
    /// it when `commit` lacks the path. The working tree is not touched.
    fn reset_path(&self, path: &Path, commit: &CommitId) -> Result<(), GitError>;

    fn write_tree_from_index(&self) -> Result<TreeId, GitError>;

    /// Write a commit object without moving any ref.
    fn write_commit(
        &self,
        tree: &TreeId,
        parents: &[CommitId],
        message: &str,
    ) -> Result<CommitId, GitError>;

    /// Point `name` at `new` only if it currently points at `expected_old`.
    ///
    /// Losing the race is reported through the outcome, not as an error.
    fn update_ref(
        &self,
        name: &str,
        expected_old: &CommitId,
        new: &CommitId,
        log_message: &str,
    ) -> Result<RefUpdateOutcome, GitError>;

    /// Content of `path` at `commit`, or `None` if the path does not exist
    /// there.
    fn read_blob_at_commit(
        &self,
        commit: &CommitId,
        path: &Path,
    ) -> Result<Option<Vec<u8>>, GitError>;

    /// Whether `ancestor` is reachable from `descendant` (or equal to it).
    fn is_ancestor(&self, ancestor: &CommitId, descendant: &CommitId) -> Result<bool, GitError>;

    fn merge_base(&self, a: &CommitId, b: &CommitId) -> Result<Option<CommitId>, GitError>;

    fn commit_parents(&self, commit: &CommitId) -> Result<Vec<CommitId>, GitError>;

    fn commit_tree(&self, commit: &CommitId) -> Result<TreeId, GitError>;
}

/// Locates the repository that contains an arbitrary path.
pub trait RepositoryProvider {
    type Repo: GitRepository;

    /// `Ok(None)` when `path` is not inside any repository.
    fn open_containing(&self, path: &Path) -> Result<Option<Self::Repo>, GitError>;
}
