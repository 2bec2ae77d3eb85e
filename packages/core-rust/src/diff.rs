//! Snapshot differ.
//!
//! Compares a freshly fetched, normalized record batch against the snapshot
//! retained from the previous poll and classifies every record as created,
//! modified, unchanged, or deleted. The snapshot is an immutable value: a
//! successful diff produces a new one that replaces the old wholesale.
//!
//! Two conditions look alike but are handled differently:
//!
//! - An **empty** batch means the collection (or filtered window) is now
//!   empty. Every prior record is deleted and the new snapshot is empty.
//! - A batch containing a record **without an identifier** cannot be
//!   diffed. No change-set is produced and the prior snapshot must be kept.

use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::mem;
use std::sync::Arc;

use crate::types::{Document, Value, ID_FIELD};

/// Identifier of a record, hashable for lookups.
///
/// Equality is value equality. Hashing is consistent with it: documents
/// hash by length only, since their equality ignores field order.
#[derive(Debug, Clone)]
pub struct RecordId(Value);

impl RecordId {
    /// Extracts the identifier of a record, if it has one.
    #[must_use]
    pub fn of(doc: &Document) -> Option<Self> {
        doc.get(ID_FIELD).cloned().map(RecordId)
    }

    /// The identifier value.
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.0
    }
}

impl PartialEq for RecordId {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for RecordId {}

impl Hash for RecordId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_value(&self.0, state);
    }
}

#[allow(clippy::float_cmp)]
fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    mem::discriminant(value).hash(state);
    match value {
        Value::Null => {}
        Value::Bool(b) => b.hash(state),
        Value::Int(i) => i.hash(state),
        // 0.0 and -0.0 are equal and must hash alike.
        Value::Float(f) => (if *f == 0.0 { 0 } else { f.to_bits() }).hash(state),
        Value::String(s) => s.hash(state),
        Value::RawString(b) | Value::Binary(b) => b.hash(state),
        Value::ObjectId(oid) => oid.hash(state),
        Value::DateTime(t) => t.hash(state),
        Value::Array(items) => {
            items.len().hash(state);
            for item in items {
                hash_value(item, state);
            }
        }
        Value::Document(doc) => doc.len().hash(state),
    }
}

/// The records observed by the most recent successful poll.
///
/// Records and identifiers are index-aligned: `ids()[i]` is the identifier
/// of `records()[i]`. Both sequences are built together and never mutated.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    records: Vec<Arc<Document>>,
    ids: Vec<RecordId>,
}

impl Snapshot {
    /// The empty snapshot a view starts with.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a snapshot, or `None` if any record lacks an identifier.
    #[must_use]
    pub fn from_records(records: Vec<Document>) -> Option<Self> {
        Self::from_shared(records.into_iter().map(Arc::new).collect())
    }

    fn from_shared(records: Vec<Arc<Document>>) -> Option<Self> {
        let ids = records
            .iter()
            .map(|doc| RecordId::of(doc))
            .collect::<Option<Vec<_>>>()?;
        Some(Self { records, ids })
    }

    /// Records in the order the store returned them.
    #[must_use]
    pub fn records(&self) -> &[Arc<Document>] {
        &self.records
    }

    /// Identifiers, aligned with `records()`.
    #[must_use]
    pub fn ids(&self) -> &[RecordId] {
        &self.ids
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the snapshot holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A record whose content changed between two polls.
#[derive(Debug, Clone, PartialEq)]
pub struct Modification {
    /// The record as just observed.
    pub current: Arc<Document>,
    /// The record as observed by the previous poll.
    pub previous: Arc<Document>,
}

impl Modification {
    /// Fields that were added, removed, or changed, in current field order
    /// followed by removed fields in previous order.
    #[must_use]
    pub fn changed_fields(&self) -> Vec<String> {
        let mut changed: Vec<String> = self
            .current
            .iter()
            .filter(|(k, v)| self.previous.get(*k) != Some(*v))
            .map(|(k, _)| k.clone())
            .collect();
        changed.extend(
            self.previous
                .keys()
                .filter(|k| !self.current.contains_key(*k))
                .cloned(),
        );
        changed
    }
}

/// Classified result of one diff pass.
///
/// Every prior record lands in exactly one of `modified` (as `previous`),
/// `unchanged`, or `deleted`; every new record in exactly one of `created`,
/// `modified` (as `current`), or `unchanged`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    /// Records with an identifier not seen by the previous poll, in input order.
    pub created: Vec<Arc<Document>>,
    /// Records whose identifier was seen before but whose content differs.
    pub modified: Vec<Modification>,
    /// Records identical to what the previous poll saw.
    pub unchanged: Vec<Arc<Document>>,
    /// Previous records whose identifier is gone.
    pub deleted: Vec<Arc<Document>>,
}

impl ChangeSet {
    /// True when nothing was created, modified, or deleted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Diffs `new_records` against `prior`.
///
/// Returns the change-set together with the snapshot that replaces `prior`,
/// or `None` when the batch cannot be diffed because a record lacks an
/// identifier. In that case the caller keeps `prior` as it is.
#[must_use]
pub fn diff(new_records: Vec<Document>, prior: &Snapshot) -> Option<(ChangeSet, Snapshot)> {
    if new_records.is_empty() {
        let changes = ChangeSet {
            deleted: prior.records.clone(),
            ..ChangeSet::default()
        };
        return Some((changes, Snapshot::empty()));
    }

    let next = Snapshot::from_records(new_records)?;

    let mut prior_positions: HashMap<&RecordId, usize> = HashMap::with_capacity(prior.len());
    for (position, id) in prior.ids.iter().enumerate() {
        prior_positions.entry(id).or_insert(position);
    }

    let mut changes = ChangeSet::default();
    for (record, id) in next.records.iter().zip(&next.ids) {
        match prior_positions.get(id) {
            None => changes.created.push(Arc::clone(record)),
            Some(&position) => {
                let previous = &prior.records[position];
                if **previous == **record {
                    changes.unchanged.push(Arc::clone(record));
                } else {
                    changes.modified.push(Modification {
                        current: Arc::clone(record),
                        previous: Arc::clone(previous),
                    });
                }
            }
        }
    }

    let current_ids: HashSet<&RecordId> = next.ids.iter().collect();
    changes.deleted = prior
        .ids
        .iter()
        .zip(&prior.records)
        .filter(|(id, _)| !current_ids.contains(id))
        .map(|(_, record)| Arc::clone(record))
        .collect();

    Some((changes, next))
}
