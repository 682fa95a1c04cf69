//! Record snapshot model: records, collections and per-identity triples.
//!
//! A [`RecordCollection`] is the in-memory form of one version of a library
//! file. Three of them (base, local, remote) are compared record by record,
//! correlated through each record's identity key.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Prefix that marks a field as internal bookkeeping rather than content.
pub const META_FIELD_PREFIX: &str = "__";

// ---------------------------------------------------------------------------
// Field names
// ---------------------------------------------------------------------------

/// Name of a record field, e.g. `title` or `__markedentry`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldName(String);

impl FieldName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Meta fields never produce conflicts and are never merged.
    ///
    /// This is the only place the meta-field rule lives; the detector and
    /// the planner both go through it.
    pub fn is_meta(&self) -> bool {
        self.0.starts_with(META_FIELD_PREFIX)
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FieldName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for FieldName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Normalize line endings so that `\r\n` and `\r` compare equal to `\n`.
pub fn normalize_value(value: &str) -> std::borrow::Cow<'_, str> {
    if value.contains('\r') {
        std::borrow::Cow::Owned(value.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        std::borrow::Cow::Borrowed(value)
    }
}

/// Compare two optional field values, ignoring line-ending differences.
pub fn values_equal(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => normalize_value(a) == normalize_value(b),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// A typed bag of named fields.
///
/// A field is either set to a string or absent; there is no null value.
/// Records without a `key` take no part in merging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Entry type, e.g. `article`.
    pub kind: String,
    /// Identity (citation) key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<FieldName, String>,
}

impl Record {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            key: None,
            fields: BTreeMap::new(),
        }
    }

    /// Create a record with an identity key.
    pub fn with_key(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            key: Some(key.into()),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter.
    pub fn field(mut self, name: impl Into<FieldName>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn get(&self, name: &FieldName) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: FieldName, value: impl Into<String>) {
        self.fields.insert(name, value.into());
    }

    pub fn clear(&mut self, name: &FieldName) -> Option<String> {
        self.fields.remove(name)
    }

    /// Non-meta field names, in order.
    pub fn content_fields(&self) -> impl Iterator<Item = &FieldName> {
        self.fields.keys().filter(|name| !name.is_meta())
    }

    /// Equality of everything the merge cares about: kind and non-meta
    /// field values, with line endings normalized.
    pub fn content_equals(&self, other: &Record) -> bool {
        if self.kind != other.kind {
            return false;
        }
        let names: BTreeSet<&FieldName> =
            self.content_fields().chain(other.content_fields()).collect();
        names
            .into_iter()
            .all(|name| values_equal(self.get(name), other.get(name)))
    }
}

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

/// An ordered set of records plus document-level metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCollection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preamble: Option<String>,
    #[serde(default)]
    pub records: Vec<Record>,
}

impl RecordCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        Self {
            preamble: None,
            records: records.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Identity → record. Keyless records are skipped; when a key occurs
    /// more than once the last occurrence wins.
    pub fn index(&self) -> BTreeMap<&str, &Record> {
        let mut index = BTreeMap::new();
        for record in &self.records {
            if let Some(key) = record.key() {
                index.insert(key, record);
            }
        }
        index
    }

    /// The record that [`index`](Self::index) would pick for `key`.
    pub fn find(&self, key: &str) -> Option<&Record> {
        self.records.iter().rev().find(|r| r.key() == Some(key))
    }

    pub fn find_mut(&mut self, key: &str) -> Option<&mut Record> {
        self.records.iter_mut().rev().find(|r| r.key() == Some(key))
    }

    /// Remove every record carrying `key`; returns how many were removed.
    pub fn remove_key(&mut self, key: &str) -> usize {
        let before = self.records.len();
        self.records.retain(|r| r.key() != Some(key));
        before - self.records.len()
    }

    pub fn insert(&mut self, record: Record) {
        self.records.push(record);
    }
}

// ---------------------------------------------------------------------------
// Triples
// ---------------------------------------------------------------------------

/// The base/local/remote versions of one identity, by presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryTriple<'a> {
    /// Added locally only.
    OnlyLocal(&'a Record),
    /// Added remotely only.
    OnlyRemote(&'a Record),
    /// Added on both sides independently.
    BothAdded {
        local: &'a Record,
        remote: &'a Record,
    },
    /// Existed in base, deleted on both sides.
    DeletedBoth(&'a Record),
    /// Deleted locally, still present remotely.
    LocalDeleted {
        base: &'a Record,
        remote: &'a Record,
    },
    /// Deleted remotely, still present locally.
    RemoteDeleted {
        base: &'a Record,
        local: &'a Record,
    },
    AllPresent {
        base: &'a Record,
        local: &'a Record,
        remote: &'a Record,
    },
}

impl<'a> EntryTriple<'a> {
    /// Classify a presence combination. `None` when the identity exists
    /// nowhere.
    pub fn classify(
        base: Option<&'a Record>,
        local: Option<&'a Record>,
        remote: Option<&'a Record>,
    ) -> Option<Self> {
        let triple = match (base, local, remote) {
            (None, None, None) => return None,
            (None, Some(local), None) => Self::OnlyLocal(local),
            (None, None, Some(remote)) => Self::OnlyRemote(remote),
            (None, Some(local), Some(remote)) => Self::BothAdded { local, remote },
            (Some(base), None, None) => Self::DeletedBoth(base),
            (Some(base), None, Some(remote)) => Self::LocalDeleted { base, remote },
            (Some(base), Some(local), None) => Self::RemoteDeleted { base, local },
            (Some(base), Some(local), Some(remote)) => Self::AllPresent {
                base,
                local,
                remote,
            },
        };
        Some(triple)
    }

    pub fn base(&self) -> Option<&'a Record> {
        match *self {
            Self::DeletedBoth(base)
            | Self::LocalDeleted { base, .. }
            | Self::RemoteDeleted { base, .. }
            | Self::AllPresent { base, .. } => Some(base),
            Self::OnlyLocal(_) | Self::OnlyRemote(_) | Self::BothAdded { .. } => None,
        }
    }

    pub fn local(&self) -> Option<&'a Record> {
        match *self {
            Self::OnlyLocal(local)
            | Self::BothAdded { local, .. }
            | Self::RemoteDeleted { local, .. }
            | Self::AllPresent { local, .. } => Some(local),
            Self::OnlyRemote(_) | Self::DeletedBoth(_) | Self::LocalDeleted { .. } => None,
        }
    }

    pub fn remote(&self) -> Option<&'a Record> {
        match *self {
            Self::OnlyRemote(remote)
            | Self::BothAdded { remote, .. }
            | Self::LocalDeleted { remote, .. }
            | Self::AllPresent { remote, .. } => Some(remote),
            Self::OnlyLocal(_) | Self::DeletedBoth(_) | Self::RemoteDeleted { .. } => None,
        }
    }
}

/// Whether a side differs from base: presence changed, or content changed.
pub(crate) fn side_changed(base: Option<&Record>, side: Option<&Record>) -> bool {
    match (base, side) {
        (None, None) => false,
        (Some(base), Some(side)) => !base.content_equals(side),
        _ => true,
    }
}
