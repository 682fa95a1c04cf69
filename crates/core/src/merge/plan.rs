//! Merge plan and analysis result types.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::conflict::ThreeWayEntryConflict;
use crate::model::{FieldName, Record};

/// Field-level patch for one record. `None` deletes the field.
pub type FieldPatch = BTreeMap<FieldName, Option<String>>;

/// Side-effect-free patch set covering every non-conflicting identity.
///
/// An identity appears in at most one of `field_patches` / `kind_patches`
/// (which may share a key), `new_entries` and `deleted_keys`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergePlan {
    #[serde(default)]
    pub field_patches: BTreeMap<String, FieldPatch>,
    /// Entry-type changes made only by remote.
    #[serde(default)]
    pub kind_patches: BTreeMap<String, String>,
    /// Records to insert, replacing any existing record with the same key.
    #[serde(default)]
    pub new_entries: Vec<Record>,
    #[serde(default)]
    pub deleted_keys: BTreeSet<String>,
}

impl MergePlan {
    pub fn is_empty(&self) -> bool {
        self.field_patches.is_empty()
            && self.kind_patches.is_empty()
            && self.new_entries.is_empty()
            && self.deleted_keys.is_empty()
    }

    pub fn patch_for(&self, key: &str) -> Option<&FieldPatch> {
        self.field_patches.get(key)
    }

    pub fn new_entry(&self, key: &str) -> Option<&Record> {
        self.new_entries.iter().find(|r| r.key() == Some(key))
    }

    /// Every identity this plan would modify.
    pub fn touched_keys(&self) -> BTreeSet<&str> {
        self.field_patches
            .keys()
            .chain(self.kind_patches.keys())
            .chain(self.deleted_keys.iter())
            .map(String::as_str)
            .chain(self.new_entries.iter().filter_map(Record::key))
            .collect()
    }

    /// Drop every contribution for `key`.
    pub(crate) fn forget(&mut self, key: &str) {
        self.field_patches.remove(key);
        self.kind_patches.remove(key);
        self.deleted_keys.remove(key);
        self.new_entries.retain(|r| r.key() != Some(key));
    }
}

/// Complete output of one merge-planning pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeAnalysis {
    pub plan: MergePlan,
    #[serde(default)]
    pub conflicts: Vec<ThreeWayEntryConflict>,
}

impl MergeAnalysis {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    pub fn conflict_keys(&self) -> BTreeSet<&str> {
        self.conflicts.iter().map(|c| c.key.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touched_keys_covers_all_parts() {
        let mut plan = MergePlan::default();
        plan.field_patches
            .entry("a".into())
            .or_default()
            .insert("title".into(), Some("T".into()));
        plan.kind_patches.insert("a".into(), "book".into());
        plan.new_entries.push(Record::with_key("article", "b"));
        plan.deleted_keys.insert("c".into());

        let touched: Vec<&str> = plan.touched_keys().into_iter().collect();
        assert_eq!(touched, vec!["a", "b", "c"]);
        assert!(!plan.is_empty());

        plan.forget("a");
        plan.forget("b");
        plan.forget("c");
        assert!(plan.is_empty());
    }

    #[test]
    fn test_plan_json_roundtrip_keeps_deletion_marker() {
        let mut plan = MergePlan::default();
        plan.field_patches
            .entry("a".into())
            .or_default()
            .insert("note".into(), None);
        let json = serde_json::to_string(&plan).unwrap();
        assert!(json.contains("\"note\":null"));
        let back: MergePlan = serde_json::from_str(&json).unwrap();
        assert_eq!(back, plan);
    }
}
