//! Error types for the bibsync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.
//!
//! Detection, planning and plan application never fail for well-formed
//! input; only the git-facing parts (pull preparation and commit
//! bookkeeping) return [`SyncError`].

use thiserror::Error;

use crate::git::RefUpdateOutcome;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from the git repository layer (real or in-memory).
#[derive(Debug, Error)]
pub enum GitError {
    /// The repository path does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// A ref (branch, tag, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// An object id was not found in the object store.
    #[error("git object not found: {0}")]
    ObjectNotFound(String),

    /// HEAD does not point at a branch, so there is no ref to update.
    #[error("HEAD is detached; check out a branch before syncing")]
    DetachedHead,

    /// The repository is bare and has no working tree.
    #[error("repository at '{0}' has no working tree")]
    BareRepository(String),

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Sync errors
// ---------------------------------------------------------------------------

/// Coarse classification of a [`SyncError`], used by callers to decide how
/// to surface the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Setup problem; not retryable.
    Configuration,
    /// Someone else moved the branch; restart the pull from scratch.
    ConcurrentModification,
    /// Lower-level repository or file I/O failure.
    RepositoryIo,
}

/// Errors from pull preparation and commit bookkeeping.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The library file is not inside any git repository.
    #[error("'{path}' is not inside a git repository")]
    NotAGitRepository { path: String },

    /// The library file is not inside the repository's working tree.
    #[error("'{path}' is outside the working tree at '{root}'")]
    PathOutsideRepository { path: String, root: String },

    /// HEAD moved between preparing the merge and finalizing it.
    #[error(
        "HEAD moved from {expected} to {actual} since the merge was prepared; restart the pull"
    )]
    ConcurrentModification { expected: String, actual: String },

    /// The compare-and-swap ref update lost a race with another writer.
    #[error("ref update of '{refname}' failed ({outcome}); restart the pull")]
    RefUpdateFailed {
        refname: String,
        outcome: RefUpdateOutcome,
    },

    /// Finalize was requested while conflicts are still open.
    #[error("{} conflict(s) remain unresolved: {}", keys.len(), keys.join(", "))]
    UnresolvedConflicts { keys: Vec<String> },

    /// Underlying git error.
    #[error("sync git error: {0}")]
    Git(#[from] GitError),

    /// Library could not be parsed or written.
    #[error("sync codec error: {0}")]
    Codec(#[from] CodecError),

    /// Reading the on-disk library failed.
    #[error("sync I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl SyncError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotAGitRepository { .. } | Self::PathOutsideRepository { .. } => {
                ErrorKind::Configuration
            }
            Self::ConcurrentModification { .. } | Self::RefUpdateFailed { .. } => {
                ErrorKind::ConcurrentModification
            }
            Self::UnresolvedConflicts { .. }
            | Self::Git(_)
            | Self::Codec(_)
            | Self::IoError(_) => ErrorKind::RepositoryIo,
        }
    }

    /// Whether restarting the pull from fresh state may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::ConcurrentModification
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Codec errors
// ---------------------------------------------------------------------------

/// Errors from reading or writing a library file.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The library content could not be parsed.
    #[error("failed to parse library: {0}")]
    Parse(String),

    /// The library could not be serialized.
    #[error("failed to serialize library: {0}")]
    Serialize(String),

    /// Generic I/O wrapper.
    #[error("library I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
