//! Applies a [`MergePlan`] onto a record collection in place.

use tracing::{debug, info, warn};

use crate::model::RecordCollection;

use super::plan::MergePlan;

/// What happened while applying a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub patched: usize,
    pub inserted: usize,
    pub deleted: usize,
    /// Patch targets missing from the collection; skipped, not fatal.
    pub skipped_patches: Vec<String>,
}

/// Stateless plan applier.
pub struct PlanApplier;

impl PlanApplier {
    /// Apply field patches, type changes and new entries.
    ///
    /// Deletions are left to [`apply_deletions`](Self::apply_deletions).
    /// Applying the same plan twice gives the same result as applying it
    /// once.
    pub fn apply(target: &mut RecordCollection, plan: &MergePlan) -> ApplyReport {
        let mut report = ApplyReport::default();

        for (key, patch) in &plan.field_patches {
            let Some(record) = target.find_mut(key) else {
                warn!(key = %key, "patch target missing from collection, skipping");
                report.skipped_patches.push(key.clone());
                continue;
            };
            for (name, value) in patch {
                match value {
                    Some(value) => record.set(name.clone(), value.clone()),
                    None => {
                        record.clear(name);
                    }
                }
            }
            report.patched += 1;
        }

        for (key, kind) in &plan.kind_patches {
            match target.find_mut(key) {
                Some(record) => record.kind = kind.clone(),
                None => {
                    warn!(key = %key, "type change target missing from collection, skipping");
                    if !report.skipped_patches.contains(key) {
                        report.skipped_patches.push(key.clone());
                    }
                }
            }
        }

        for entry in &plan.new_entries {
            if let Some(key) = entry.key() {
                let replaced = target.remove_key(key);
                if replaced > 0 {
                    debug!(key, replaced, "replacing existing entry");
                }
            }
            target.insert(entry.clone());
            report.inserted += 1;
        }

        info!(
            patched = report.patched,
            inserted = report.inserted,
            skipped = report.skipped_patches.len(),
            "merge plan applied"
        );
        report
    }

    /// Remove every record whose key the plan marks as deleted.
    pub fn apply_deletions(target: &mut RecordCollection, plan: &MergePlan) -> usize {
        let removed: usize = plan.deleted_keys.iter().map(|key| target.remove_key(key)).sum();
        debug!(removed, "deletions applied");
        removed
    }

    /// Deletions followed by [`apply`](Self::apply).
    pub fn apply_all(target: &mut RecordCollection, plan: &MergePlan) -> ApplyReport {
        let deleted = Self::apply_deletions(target, plan);
        let mut report = Self::apply(target, plan);
        report.deleted = deleted;
        report
    }
}
