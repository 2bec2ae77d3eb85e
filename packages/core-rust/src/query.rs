//! Query-shaping types handed to a data store: sort keys, projections,
//! find options, and index specifications.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::criteria::Criteria;
use crate::literal::parse_literal;
use crate::normalize::TimeShift;
use crate::types::{lookup_path, Document, Value, ID_FIELD};

/// Sort or index direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Smallest first (`1`).
    Ascending,
    /// Largest first (`-1`).
    Descending,
}

impl Direction {
    /// The numeric form used in index specifications.
    #[must_use]
    pub fn as_i64(self) -> i64 {
        match self {
            Direction::Ascending => 1,
            Direction::Descending => -1,
        }
    }

    /// Parses `1` or `-1`.
    #[must_use]
    pub fn from_i64(n: i64) -> Option<Self> {
        match n {
            1 => Some(Direction::Ascending),
            -1 => Some(Direction::Descending),
            _ => None,
        }
    }

    /// Applies this direction to an ascending ordering.
    #[must_use]
    pub fn apply(self, ord: Ordering) -> Ordering {
        match self {
            Direction::Ascending => ord,
            Direction::Descending => ord.reverse(),
        }
    }
}

/// One key of a sort specification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    /// Dotted field path.
    pub field: String,
    /// Sort direction.
    pub direction: Direction,
}

impl SortKey {
    /// Creates a sort key.
    #[must_use]
    pub fn new(field: impl Into<String>, direction: Direction) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }
}

/// Compares two documents under a multi-key sort. Missing fields sort as null.
#[must_use]
pub fn compare_by(a: &Document, b: &Document, sort: &[SortKey]) -> Ordering {
    for key in sort {
        let left = lookup_path(a, &key.field).into_iter().next().unwrap_or(&Value::Null);
        let right = lookup_path(b, &key.field).into_iter().next().unwrap_or(&Value::Null);
        let ord = key.direction.apply(left.compare(right));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Field projection applied by the store before returning documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// Return every field except these.
    Exclude(Vec<String>),
}

impl Projection {
    /// Applies the projection to a document.
    #[must_use]
    pub fn apply(&self, mut doc: Document) -> Document {
        match self {
            Projection::Exclude(fields) => {
                for field in fields {
                    doc.shift_remove(field);
                }
                doc
            }
        }
    }
}

/// Options for a single `find` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Filter predicate.
    pub criteria: Criteria,
    /// Optional field projection.
    pub projection: Option<Projection>,
    /// Sort keys, most significant first. Empty means store order.
    pub sort: Vec<SortKey>,
    /// Maximum number of documents to return.
    pub limit: Option<usize>,
}

impl FindOptions {
    /// Options that fetch everything matching `criteria`.
    #[must_use]
    pub fn filtered(criteria: Criteria) -> Self {
        Self {
            criteria,
            ..Self::default()
        }
    }

    /// Sets the projection.
    #[must_use]
    pub fn projection(mut self, projection: Option<Projection>) -> Self {
        self.projection = projection;
        self
    }

    /// Sorts by `field` in `direction`, breaking ties by identifier so that
    /// the order is total.
    #[must_use]
    pub fn sort(mut self, field: &str, direction: Direction) -> Self {
        self.sort = vec![SortKey::new(field, direction)];
        if field != ID_FIELD {
            self.sort.push(SortKey::new(ID_FIELD, direction));
        }
        self
    }

    /// Caps the number of returned documents.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// An index specification: an ordered list of keyed directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Index keys, most significant first.
    pub keys: Vec<SortKey>,
}

/// Name of the index every collection has on its identifier.
pub const ID_INDEX_NAME: &str = "_id_";

impl IndexSpec {
    /// Conventional index name: `field_1_other_-1`.
    #[must_use]
    pub fn name(&self) -> String {
        self.keys
            .iter()
            .map(|k| format!("{}_{}", k.field, k.direction.as_i64()))
            .collect::<Vec<_>>()
            .join("_")
    }
}

impl fmt::Display for IndexSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, key) in self.keys.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "('{}', {})", key.field, key.direction.as_i64())?;
        }
        f.write_str("]")
    }
}

/// Parses index text such as `('ready_time', 1), ('finish_time', -1)`.
///
/// Text not already wrapped in `[...]` is wrapped first. Returns `None` for
/// empty or malformed input, including directions other than `1`/`-1`.
#[must_use]
pub fn parse_index_spec(text: &str) -> Option<IndexSpec> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let wrapped = if trimmed.starts_with('[') {
        trimmed.to_string()
    } else {
        format!("[{trimmed}]")
    };
    let Ok(Value::Array(items)) = parse_literal(&wrapped, TimeShift::zero()) else {
        return None;
    };
    // `'a', 1` without parentheses wraps to `['a', 1]`.
    let bare_pair = matches!(items.as_slice(), [Value::String(_), Value::Int(_)]);
    let items = if bare_pair {
        vec![Value::Array(items)]
    } else {
        items
    };
    let keys = items
        .iter()
        .map(|item| match item {
            Value::Array(pair) => match pair.as_slice() {
                [Value::String(field), Value::Int(dir)] if !field.is_empty() => {
                    Some(SortKey::new(field.clone(), Direction::from_i64(*dir)?))
                }
                _ => None,
            },
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    if keys.is_empty() {
        None
    } else {
        Some(IndexSpec { keys })
    }
}
