//! Record-level three-way merge planner.
//!
//! Walks every identity that changed on either side, escalates conflicts,
//! and turns everything else into a [`MergePlan`]. Automatic merging only
//! ever carries over changes the local side has not touched.

use std::collections::BTreeSet;

use tracing::{debug, info, instrument, warn};

use crate::conflict::detector::changed_keys;
use crate::conflict::ConflictDetector;
use crate::model::{values_equal, EntryTriple, FieldName, Record, RecordCollection};

use super::plan::{FieldPatch, MergeAnalysis, MergePlan};

/// Stateless merge planner.
pub struct MergePlanner;

impl MergePlanner {
    /// Compare base, local and remote and produce the plan plus conflicts.
    ///
    /// Deterministic (identities are visited in key order) and total for
    /// any input.
    #[instrument(skip_all, fields(base = base.len(), local = local.len(), remote = remote.len()))]
    pub fn analyze(
        base: &RecordCollection,
        local: &RecordCollection,
        remote: &RecordCollection,
    ) -> MergeAnalysis {
        let base_index = base.index();
        let local_index = local.index();
        let remote_index = remote.index();

        let mut analysis = MergeAnalysis::default();

        for key in changed_keys(&base_index, &local_index, &remote_index) {
            let Some(triple) = EntryTriple::classify(
                base_index.get(key).copied(),
                local_index.get(key).copied(),
                remote_index.get(key).copied(),
            ) else {
                continue;
            };

            if let Some(conflict) = ConflictDetector::detect(key, triple) {
                analysis.conflicts.push(conflict);
                continue;
            }

            contribute(key, triple, &mut analysis.plan);
        }

        info!(
            patches = analysis.plan.field_patches.len(),
            new_entries = analysis.plan.new_entries.len(),
            deletions = analysis.plan.deleted_keys.len(),
            conflicts = analysis.conflicts.len(),
            "merge analysis complete"
        );
        analysis
    }

    /// Only the plan part of [`analyze`](Self::analyze).
    pub fn extract_plan(
        base: &RecordCollection,
        local: &RecordCollection,
        remote: &RecordCollection,
    ) -> MergePlan {
        Self::analyze(base, local, remote).plan
    }
}

/// Add the automatic contribution of one non-conflicting identity.
fn contribute(key: &str, triple: EntryTriple<'_>, plan: &mut MergePlan) {
    match triple {
        // Local additions and local deletions need nothing from remote.
        EntryTriple::OnlyLocal(_) | EntryTriple::LocalDeleted { .. } => {}

        EntryTriple::OnlyRemote(remote) => {
            debug!(key, "remote added entry");
            plan.new_entries.push(remote.clone());
        }

        EntryTriple::BothAdded { local, remote } => {
            debug!(key, "both added entry, taking union");
            plan.new_entries.push(union(local, remote));
        }

        EntryTriple::DeletedBoth(_) => {
            plan.deleted_keys.insert(key.to_string());
        }

        EntryTriple::RemoteDeleted { base, local } => {
            // A locally edited record would have been flagged delete/modify.
            debug_assert!(
                base.content_equals(local),
                "remote deletion of locally modified '{key}' reached the planner"
            );
            if base.content_equals(local) {
                debug!(key, "propagating remote deletion");
                plan.deleted_keys.insert(key.to_string());
            } else {
                warn!(key, "skipping remote deletion of locally modified entry");
            }
        }

        EntryTriple::AllPresent {
            base,
            local,
            remote,
        } => {
            let patch = field_patch(key, base, local, remote);
            if !patch.is_empty() {
                plan.field_patches.insert(key.to_string(), patch);
            }
            if base.kind != remote.kind && base.kind == local.kind {
                plan.kind_patches.insert(key.to_string(), remote.kind.clone());
            }
        }
    }
}

/// Local record extended with every remote field it lacks. Values already
/// present locally are never overwritten.
fn union(local: &Record, remote: &Record) -> Record {
    let mut merged = local.clone();
    for name in remote.content_fields() {
        if !merged.fields.contains_key(name) {
            if let Some(value) = remote.get(name) {
                merged.set(name.clone(), value);
            }
        }
    }
    merged
}

/// Remote field changes that local left alone.
fn field_patch(key: &str, base: &Record, local: &Record, remote: &Record) -> FieldPatch {
    let names: BTreeSet<&FieldName> = base.content_fields().chain(remote.content_fields()).collect();
    let mut patch = FieldPatch::new();

    for name in names {
        let b = base.get(name);
        let l = local.get(name);
        let r = remote.get(name);

        if values_equal(b, r) {
            continue;
        }
        if values_equal(l, b) {
            patch.insert(name.clone(), r.map(str::to_string));
        } else if values_equal(l, r) {
            // Convergent edit.
        } else {
            warn!(key, field = %name, "divergent field edit outside conflict list, keeping local");
        }
    }
    patch
}
