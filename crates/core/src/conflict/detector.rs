//! Record-level conflict detection.
//!
//! Given the base, local and remote versions of one record, the detector
//! decides whether the three can be reconciled automatically. Anything it
//! flags is excluded from the merge plan and handed to the user.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::model::{side_changed, values_equal, EntryTriple, FieldName, Record, RecordCollection};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Categorisation of a conflict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Both sides added the same key with disagreeing fields.
    BothAdded,
    /// One side deleted the record, the other edited it.
    DeleteModify,
    /// Both sides edited the same field differently.
    FieldDisagreement,
    /// Both sides changed the entry type, to different types.
    KindDisagreement,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BothAdded => write!(f, "both_added"),
            Self::DeleteModify => write!(f, "delete_modify"),
            Self::FieldDisagreement => write!(f, "field_disagreement"),
            Self::KindDisagreement => write!(f, "kind_disagreement"),
        }
    }
}

/// The three versions of one identity that could not be merged
/// automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreeWayEntryConflict {
    /// Identity key of the conflicting record.
    pub key: String,
    pub kind: ConflictKind,
    pub base: Option<Record>,
    pub local: Option<Record>,
    pub remote: Option<Record>,
    /// Fields that disagree (empty for delete/modify and type conflicts).
    #[serde(default)]
    pub fields: Vec<FieldName>,
}

impl ThreeWayEntryConflict {
    fn new(key: &str, kind: ConflictKind, triple: EntryTriple<'_>, fields: Vec<FieldName>) -> Self {
        Self {
            key: key.to_string(),
            kind,
            base: triple.base().cloned(),
            local: triple.local().cloned(),
            remote: triple.remote().cloned(),
            fields,
        }
    }
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

/// Stateless record-level conflict detector.
pub struct ConflictDetector;

impl ConflictDetector {
    /// Decide whether one identity's triple conflicts.
    ///
    /// Callers only pass identities where at least one side changed; an
    /// unchanged triple simply yields `None`.
    pub fn detect(key: &str, triple: EntryTriple<'_>) -> Option<ThreeWayEntryConflict> {
        let conflict = match triple {
            EntryTriple::BothAdded { local, remote } => {
                let fields = added_field_disagreements(local, remote);
                if !fields.is_empty() {
                    ThreeWayEntryConflict::new(key, ConflictKind::BothAdded, triple, fields)
                } else if local.kind != remote.kind {
                    ThreeWayEntryConflict::new(key, ConflictKind::KindDisagreement, triple, vec![])
                } else {
                    return None;
                }
            }
            EntryTriple::LocalDeleted { base, remote } if !base.content_equals(remote) => {
                ThreeWayEntryConflict::new(key, ConflictKind::DeleteModify, triple, vec![])
            }
            EntryTriple::RemoteDeleted { base, local } if !base.content_equals(local) => {
                ThreeWayEntryConflict::new(key, ConflictKind::DeleteModify, triple, vec![])
            }
            EntryTriple::AllPresent {
                base,
                local,
                remote,
            } => {
                if base.content_equals(local) || base.content_equals(remote) {
                    return None;
                }
                let fields = conflicting_fields(base, local, remote);
                if !fields.is_empty() {
                    ThreeWayEntryConflict::new(key, ConflictKind::FieldDisagreement, triple, fields)
                } else if kinds_diverged(base, local, remote) {
                    ThreeWayEntryConflict::new(key, ConflictKind::KindDisagreement, triple, vec![])
                } else {
                    return None;
                }
            }
            EntryTriple::OnlyLocal(_)
            | EntryTriple::OnlyRemote(_)
            | EntryTriple::DeletedBoth(_)
            | EntryTriple::LocalDeleted { .. }
            | EntryTriple::RemoteDeleted { .. } => return None,
        };

        debug!(key, kind = %conflict.kind, fields = conflict.fields.len(), "conflict detected");
        Some(conflict)
    }

    /// Run detection over every changed identity of three collections.
    pub fn detect_all(
        base: &RecordCollection,
        local: &RecordCollection,
        remote: &RecordCollection,
    ) -> Vec<ThreeWayEntryConflict> {
        let base_index = base.index();
        let local_index = local.index();
        let remote_index = remote.index();

        let conflicts: Vec<_> = changed_keys(&base_index, &local_index, &remote_index)
            .into_iter()
            .filter_map(|key| {
                let triple = EntryTriple::classify(
                    base_index.get(key).copied(),
                    local_index.get(key).copied(),
                    remote_index.get(key).copied(),
                )?;
                Self::detect(key, triple)
            })
            .collect();

        info!(count = conflicts.len(), "conflict detection complete");
        conflicts
    }
}

/// Identities whose record changed from base to local or base to remote,
/// in key order.
pub(crate) fn changed_keys<'a>(
    base: &std::collections::BTreeMap<&'a str, &'a Record>,
    local: &std::collections::BTreeMap<&'a str, &'a Record>,
    remote: &std::collections::BTreeMap<&'a str, &'a Record>,
) -> Vec<&'a str> {
    let all: BTreeSet<&'a str> = base
        .keys()
        .chain(local.keys())
        .chain(remote.keys())
        .copied()
        .collect();

    all.into_iter()
        .filter(|key| {
            let b = base.get(key).copied();
            side_changed(b, local.get(key).copied()) || side_changed(b, remote.get(key).copied())
        })
        .collect()
}

/// Non-meta fields that make a three-way field merge impossible.
///
/// A field conflicts when both sides moved away from base and did not land
/// on the same value. This covers: both changed to different values, one
/// deleted while the other changed, and both added with different values.
pub fn conflicting_fields(base: &Record, local: &Record, remote: &Record) -> Vec<FieldName> {
    let names: BTreeSet<&FieldName> = base
        .content_fields()
        .chain(local.content_fields())
        .chain(remote.content_fields())
        .collect();

    names
        .into_iter()
        .filter(|name| {
            let b = base.get(name);
            let l = local.get(name);
            let r = remote.get(name);
            !values_equal(l, b) && !values_equal(r, b) && !values_equal(l, r)
        })
        .cloned()
        .collect()
}

/// Whether the field sets of three versions cannot be merged.
pub fn has_conflicting_fields(base: &Record, local: &Record, remote: &Record) -> bool {
    !conflicting_fields(base, local, remote).is_empty()
}

/// Fields set to different non-empty values on two independently added
/// records.
fn added_field_disagreements(local: &Record, remote: &Record) -> Vec<FieldName> {
    local
        .content_fields()
        .filter(|name| match (local.get(name), remote.get(name)) {
            (Some(l), Some(r)) if !l.is_empty() && !r.is_empty() => {
                !values_equal(Some(l), Some(r))
            }
            _ => false,
        })
        .cloned()
        .collect()
}

fn kinds_diverged(base: &Record, local: &Record, remote: &Record) -> bool {
    base.kind != local.kind && base.kind != remote.kind && local.kind != remote.kind
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(author: &str) -> Record {
        Record::with_key("article", "a").field("author", author)
    }

    fn detect(
        base: Option<&Record>,
        local: Option<&Record>,
        remote: Option<&Record>,
    ) -> Option<ThreeWayEntryConflict> {
        EntryTriple::classify(base, local, remote).and_then(|t| ConflictDetector::detect("a", t))
    }

    #[test]
    fn test_both_added_identical_no_conflict() {
        let a = article("same");
        assert!(detect(None, Some(&a), Some(&a)).is_none());
    }

    #[test]
    fn test_both_added_disjoint_fields_no_conflict() {
        let local = Record::with_key("article", "a").field("author", "local");
        let remote = Record::with_key("article", "a").field("journal", "Remote Journal");
        assert!(detect(None, Some(&local), Some(&remote)).is_none());
    }

    #[test]
    fn test_both_added_empty_value_does_not_disagree() {
        let local = Record::with_key("article", "a").field("note", "");
        let remote = Record::with_key("article", "a").field("note", "text");
        assert!(detect(None, Some(&local), Some(&remote)).is_none());
    }

    #[test]
    fn test_both_added_conflicting_values() {
        let c = detect(None, Some(&article("local")), Some(&article("remote"))).unwrap();
        assert_eq!(c.kind, ConflictKind::BothAdded);
        assert_eq!(c.fields, vec![FieldName::from("author")]);
        assert!(c.base.is_none());
    }

    #[test]
    fn test_both_added_different_types() {
        let local = Record::with_key("book", "a").field("author", "base");
        let remote = Record::with_key("inproceedings", "a").field("author", "base");
        let c = detect(None, Some(&local), Some(&remote)).unwrap();
        assert_eq!(c.kind, ConflictKind::KindDisagreement);
    }

    #[test]
    fn test_meta_fields_never_conflict() {
        let local = article("x").field("__markedentry", "[alice]");
        let remote = article("x").field("__markedentry", "[bob]");
        assert!(detect(None, Some(&local), Some(&remote)).is_none());

        let base = article("base");
        let local = article("base").field("__markedentry", "[alice]");
        let remote = article("base").field("__markedentry", "[bob]");
        assert!(detect(Some(&base), Some(&local), Some(&remote)).is_none());
    }

    #[test]
    fn test_local_deleted_remote_modified() {
        let base = article("base");
        let c = detect(Some(&base), None, Some(&article("remote"))).unwrap();
        assert_eq!(c.kind, ConflictKind::DeleteModify);
        assert!(c.local.is_none());
    }

    #[test]
    fn test_remote_deleted_local_modified() {
        let base = article("base");
        let c = detect(Some(&base), Some(&article("local")), None).unwrap();
        assert_eq!(c.kind, ConflictKind::DeleteModify);
    }

    #[test]
    fn test_deletion_against_unchanged_side_is_fine() {
        let base = article("base");
        assert!(detect(Some(&base), None, Some(&base)).is_none());
        assert!(detect(Some(&base), Some(&base), None).is_none());
        assert!(detect(Some(&base), None, None).is_none());
    }

    #[test]
    fn test_both_modified_same_field_differently() {
        let c = detect(
            Some(&article("base")),
            Some(&article("local")),
            Some(&article("remote")),
        )
        .unwrap();
        assert_eq!(c.kind, ConflictKind::FieldDisagreement);
        assert_eq!(c.fields, vec![FieldName::from("author")]);
    }

    #[test]
    fn test_both_modified_different_fields() {
        let base = article("base").field("title", "A");
        let local = article("local").field("title", "A");
        let remote = article("base").field("title", "B");
        assert!(detect(Some(&base), Some(&local), Some(&remote)).is_none());
    }

    #[test]
    fn test_convergent_edits_are_not_conflicts() {
        assert!(detect(
            Some(&article("base")),
            Some(&article("common")),
            Some(&article("common"))
        )
        .is_none());
    }

    #[test]
    fn test_field_delete_vs_change() {
        let base = article("base").field("title", "A");
        let local = Record::with_key("article", "a").field("title", "A2");
        let remote = article("other").field("title", "A");
        let c = detect(Some(&base), Some(&local), Some(&remote)).unwrap();
        assert_eq!(c.fields, vec![FieldName::from("author")]);
    }

    #[test]
    fn test_field_added_both_sides_differently() {
        let base = Record::with_key("article", "a").field("title", "T");
        let local = base.clone().field("year", "2020");
        let remote = base.clone().field("year", "2021");
        assert!(has_conflicting_fields(&base, &local, &remote));
    }

    #[test]
    fn test_type_changed_differently_on_both_sides() {
        let base = Record::with_key("article", "a").field("author", "x");
        let local = Record::with_key("book", "a").field("author", "x");
        let remote = Record::with_key("misc", "a").field("author", "x");
        let c = detect(Some(&base), Some(&local), Some(&remote)).unwrap();
        assert_eq!(c.kind, ConflictKind::KindDisagreement);
    }

    #[test]
    fn test_line_ending_only_difference() {
        let base = Record::with_key("article", "a").field("comment", "line1\n\nline3");
        let local = Record::with_key("article", "a").field("comment", "line1\r\n\r\nline3");
        assert!(detect(Some(&base), Some(&local), Some(&base)).is_none());
        assert!(ConflictDetector::detect_all(
            &RecordCollection::from_records([base.clone()]),
            &RecordCollection::from_records([local]),
            &RecordCollection::from_records([base]),
        )
        .is_empty());
    }

    #[test]
    fn test_detect_all_over_collections() {
        let base = RecordCollection::from_records([
            article("base"),
            Record::with_key("article", "b").field("title", "B"),
        ]);
        let local = RecordCollection::from_records([
            article("local"),
            Record::with_key("article", "b").field("title", "B"),
        ]);
        let remote = RecordCollection::from_records([
            article("remote"),
            Record::with_key("article", "b").field("title", "B2"),
        ]);
        let conflicts = ConflictDetector::detect_all(&base, &local, &remote);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].key, "a");
    }
}
