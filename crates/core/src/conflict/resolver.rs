//! Conflict resolution bridge.
//!
//! The user resolves each [`ThreeWayEntryConflict`] (accept local, accept
//! remote, or hand-edit a record). The bridge splices the resolved records
//! into the remote snapshot and re-plans, so the resolved identities are
//! carried by the plan instead of the conflict list.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::SyncError;
use crate::merge::{MergePlan, MergePlanner};
use crate::model::{Record, RecordCollection};

use super::detector::ThreeWayEntryConflict;

/// Named resolution strategies for one conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Keep the local version (a local deletion stays deleted).
    AcceptLocal,
    /// Take the remote version (a remote deletion is propagated).
    AcceptRemote,
    /// Use a hand-merged record.
    AcceptMerged(Record),
}

/// Outcome of resolving one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedEntry {
    Keep(Record),
    Delete(String),
}

impl ResolvedEntry {
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Keep(record) => record.key(),
            Self::Delete(key) => Some(key),
        }
    }
}

/// Stateless resolution operations.
pub struct ConflictResolutionBridge;

impl ConflictResolutionBridge {
    /// The record (or deletion) a resolution stands for.
    pub fn resolved_entry(conflict: &ThreeWayEntryConflict, resolution: &Resolution) -> ResolvedEntry {
        let chosen = match resolution {
            Resolution::AcceptLocal => conflict.local.clone(),
            Resolution::AcceptRemote => conflict.remote.clone(),
            Resolution::AcceptMerged(record) => {
                let mut record = record.clone();
                record.key = Some(conflict.key.clone());
                Some(record)
            }
        };
        match chosen {
            Some(record) => ResolvedEntry::Keep(record),
            None => ResolvedEntry::Delete(conflict.key.clone()),
        }
    }

    /// A copy of `remote` where every record sharing a key with a resolved
    /// record is replaced by a copy of the resolved one.
    pub fn replace_entries(remote: &RecordCollection, resolved: &[Record]) -> RecordCollection {
        let resolved_keys: BTreeSet<&str> = resolved.iter().filter_map(Record::key).collect();

        let mut revised = RecordCollection {
            preamble: remote.preamble.clone(),
            records: remote
                .records
                .iter()
                .filter(|r| r.key().map_or(true, |k| !resolved_keys.contains(k)))
                .cloned()
                .collect(),
        };
        revised.records.extend(resolved.iter().cloned());

        debug!(replaced = resolved_keys.len(), "resolved entries spliced into remote");
        revised
    }

    /// Re-plan after the user resolved conflicts.
    ///
    /// Resolved identities become replacing new entries (or deletions);
    /// every other identity is planned as usual against the revised remote.
    /// Fails if a conflict remains for an identity the user did not resolve.
    pub fn resolve_analysis(
        base: &RecordCollection,
        local: &RecordCollection,
        remote: &RecordCollection,
        resolved: &[ResolvedEntry],
    ) -> Result<MergePlan, SyncError> {
        let kept: Vec<Record> = resolved
            .iter()
            .filter_map(|entry| match entry {
                ResolvedEntry::Keep(record) => Some(record.clone()),
                ResolvedEntry::Delete(_) => None,
            })
            .collect();
        let mut revised = Self::replace_entries(remote, &kept);
        for entry in resolved {
            if let ResolvedEntry::Delete(key) = entry {
                revised.remove_key(key);
            }
        }

        let analysis = MergePlanner::analyze(base, local, &revised);
        let resolved_keys: BTreeSet<&str> = resolved.iter().filter_map(ResolvedEntry::key).collect();
        let open: Vec<String> = analysis
            .conflicts
            .iter()
            .filter(|c| !resolved_keys.contains(c.key.as_str()))
            .map(|c| c.key.clone())
            .collect();
        if !open.is_empty() {
            return Err(SyncError::UnresolvedConflicts { keys: open });
        }

        let mut plan = analysis.plan;
        for entry in resolved {
            if let Some(key) = entry.key() {
                plan.forget(key);
            }
            match entry {
                ResolvedEntry::Keep(record) => plan.new_entries.push(record.clone()),
                ResolvedEntry::Delete(key) => {
                    plan.deleted_keys.insert(key.clone());
                }
            }
        }

        info!(resolved = resolved.len(), "resolution plan computed");
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::ConflictKind;
    use crate::merge::PlanApplier;

    fn article(key: &str, title: &str) -> Record {
        Record::with_key("article", key).field("title", title)
    }

    fn conflict() -> ThreeWayEntryConflict {
        ThreeWayEntryConflict {
            key: "k1".into(),
            kind: ConflictKind::FieldDisagreement,
            base: Some(article("k1", "A")),
            local: Some(article("k1", "C")),
            remote: Some(article("k1", "B")),
            fields: vec!["title".into()],
        }
    }

    #[test]
    fn test_resolved_entry_strategies() {
        let c = conflict();
        assert_eq!(
            ConflictResolutionBridge::resolved_entry(&c, &Resolution::AcceptLocal),
            ResolvedEntry::Keep(article("k1", "C"))
        );
        assert_eq!(
            ConflictResolutionBridge::resolved_entry(&c, &Resolution::AcceptRemote),
            ResolvedEntry::Keep(article("k1", "B"))
        );
        let merged = Record::new("article").field("title", "B and C");
        assert_eq!(
            ConflictResolutionBridge::resolved_entry(&c, &Resolution::AcceptMerged(merged)),
            ResolvedEntry::Keep(article("k1", "B and C"))
        );

        let mut deleted_remotely = conflict();
        deleted_remotely.remote = None;
        assert_eq!(
            ConflictResolutionBridge::resolved_entry(&deleted_remotely, &Resolution::AcceptRemote),
            ResolvedEntry::Delete("k1".into())
        );
    }

    #[test]
    fn test_replace_entries_builds_new_collection() {
        let mut remote = RecordCollection::from_records([article("k1", "B"), article("k2", "X")]);
        remote.preamble = Some("@preamble".into());
        let revised =
            ConflictResolutionBridge::replace_entries(&remote, &[article("k1", "resolved")]);

        assert_eq!(revised.len(), 2);
        assert_eq!(revised.preamble.as_deref(), Some("@preamble"));
        assert_eq!(revised.find("k1").unwrap().get(&"title".into()), Some("resolved"));
        assert_eq!(remote.find("k1").unwrap().get(&"title".into()), Some("B"));
    }

    #[test]
    fn test_resolve_analysis_clears_conflict() {
        let base = RecordCollection::from_records([article("k1", "A"), article("k2", "X")]);
        let local = RecordCollection::from_records([article("k1", "C"), article("k2", "X")]);
        let remote = RecordCollection::from_records([article("k1", "B"), article("k2", "Y")]);

        assert!(MergePlanner::analyze(&base, &local, &remote).has_conflicts());

        let resolved = vec![ResolvedEntry::Keep(article("k1", "B"))];
        let plan =
            ConflictResolutionBridge::resolve_analysis(&base, &local, &remote, &resolved).unwrap();

        let mut merged = local.clone();
        PlanApplier::apply_all(&mut merged, &plan);
        assert_eq!(merged.find("k1").unwrap().get(&"title".into()), Some("B"));
        assert_eq!(merged.find("k2").unwrap().get(&"title".into()), Some("Y"));
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_resolve_analysis_with_deletion() {
        let base = RecordCollection::from_records([article("k1", "A")]);
        let local = RecordCollection::from_records([article("k1", "C")]);
        let remote = RecordCollection::new();

        let resolved = vec![ResolvedEntry::Delete("k1".into())];
        let plan =
            ConflictResolutionBridge::resolve_analysis(&base, &local, &remote, &resolved).unwrap();
        assert!(plan.deleted_keys.contains("k1"));
        assert!(plan.new_entry("k1").is_none());
    }

    #[test]
    fn test_resolve_analysis_reports_open_conflicts() {
        let base = RecordCollection::from_records([article("k1", "A"), article("k2", "A")]);
        let local = RecordCollection::from_records([article("k1", "C"), article("k2", "C")]);
        let remote = RecordCollection::from_records([article("k1", "B"), article("k2", "B")]);

        let resolved = vec![ResolvedEntry::Keep(article("k1", "B"))];
        let err = ConflictResolutionBridge::resolve_analysis(&base, &local, &remote, &resolved)
            .unwrap_err();
        assert!(matches!(err, SyncError::UnresolvedConflicts { ref keys } if keys == &["k2".to_string()]));
    }
}
