//! Record-level merge planning and plan application.
//!
//! 1. **Planning** -- compare base, local and remote collections and compute a
//!    conflict-free [`MergePlan`] plus the list of conflicts.
//! 2. **Application** -- mutate a target collection according to a plan.

pub mod applier;
pub mod plan;
pub mod planner;

pub use applier::{ApplyReport, PlanApplier};
pub use plan::{FieldPatch, MergeAnalysis, MergePlan};
pub use planner::MergePlanner;
