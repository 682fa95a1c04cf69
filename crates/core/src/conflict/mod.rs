//! Conflict detection and resolution.
//!
//! The conflict subsystem is responsible for:
//! 1. **Detection** -- deciding per record whether base, local and remote can
//!    be reconciled automatically.
//! 2. **Resolution** -- splicing user-resolved records back into the remote
//!    snapshot and re-planning.

pub mod detector;
pub mod resolver;

pub use detector::{ConflictDetector, ConflictKind, ThreeWayEntryConflict};
pub use resolver::{ConflictResolutionBridge, Resolution, ResolvedEntry};
