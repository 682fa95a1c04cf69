//! bibsync core library.
//!
//! Record-level three-way merging of bibliography libraries and the git
//! bookkeeping that records a merge: snapshot model, conflict detection,
//! merge planning and application, conflict resolution, pull preparation,
//! and commit finalization over a narrow repository interface.

pub mod codec;
pub mod config;
pub mod conflict;
pub mod errors;
pub mod finalize;
pub mod git;
pub mod merge;
pub mod model;
pub mod pull;

// Re-exports for convenience.
pub use codec::{JsonLibraryCodec, LibraryCodec};
pub use config::AppConfig;
pub use conflict::{ConflictDetector, ConflictKind, ConflictResolutionBridge, ThreeWayEntryConflict};
pub use errors::{CoreError, SyncError};
pub use finalize::{CommitBookkeeper, FinalizeOutcome};
pub use merge::{MergeAnalysis, MergePlan, MergePlanner, PlanApplier};
pub use model::{FieldName, Record, RecordCollection};
pub use pull::{prepare_pull, PullComputation};
