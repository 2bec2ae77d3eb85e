//! Document model shared by every layer of the engine.
//!
//! A [`Document`] is an insertion-ordered map of field names to [`Value`]s.
//! Equality between documents ignores field order (two documents are equal
//! when they carry the same fields with equal values), while iteration keeps
//! the order in which the data store returned the fields so that column
//! discovery is stable.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;

/// Name of the field every diffable record must carry.
pub const ID_FIELD: &str = "_id";

/// A record as returned by the data store.
pub type Document = IndexMap<String, Value>;

/// Runtime value of a document field.
///
/// Covers the scalar types a document store hands back plus nested arrays
/// and documents. `RawString` carries text whose bytes have not been decoded
/// yet; the normalizer turns it into `String` when the bytes are valid UTF-8.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Explicit null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit IEEE 754 float.
    Float(f64),
    /// Decoded UTF-8 text.
    String(String),
    /// Text bytes as they came off the wire, not yet decoded.
    RawString(Vec<u8>),
    /// Opaque binary payload.
    Binary(Vec<u8>),
    /// 12-byte object identifier.
    ObjectId([u8; 12]),
    /// Point in time (UTC as stored; shifted to display time by the normalizer).
    DateTime(DateTime<Utc>),
    /// Ordered sequence of values.
    Array(Vec<Value>),
    /// Nested document.
    Document(Document),
}

impl Value {
    /// Canonical comparison rank of the value's type.
    ///
    /// Values of different ranks order by rank; numbers share a rank so that
    /// `Int` and `Float` compare numerically.
    #[must_use]
    pub fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::String(_) | Value::RawString(_) => 3,
            Value::Document(_) => 4,
            Value::Array(_) => 5,
            Value::Binary(_) => 6,
            Value::ObjectId(_) => 7,
            Value::Bool(_) => 8,
            Value::DateTime(_) => 9,
        }
    }

    /// Total ordering used for sorting query results.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn compare(&self, other: &Value) -> Ordering {
        let rank = self.type_rank().cmp(&other.type_rank());
        if rank != Ordering::Equal {
            return rank;
        }
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).total_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.total_cmp(&(*b as f64)),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            (Value::ObjectId(a), Value::ObjectId(b)) => a.cmp(b),
            (Value::Binary(a), Value::Binary(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
            (Value::Array(a), Value::Array(b)) => compare_seq(a.iter(), b.iter()),
            (Value::Document(a), Value::Document(b)) => compare_documents(a, b),
            (a, b) => match (a.text_bytes(), b.text_bytes()) {
                (Some(x), Some(y)) => x.cmp(y),
                _ => Ordering::Equal,
            },
        }
    }

    /// Bytes of a textual value, decoded or not.
    fn text_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::String(s) => Some(s.as_bytes()),
            Value::RawString(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the string slice if this is decoded text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer if this is an `Int`.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the nested document if this is a `Document`.
    #[must_use]
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(d) => Some(d),
            _ => None,
        }
    }

    /// Truthiness as a scripting language would judge it.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::RawString(b) | Value::Binary(b) => !b.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Document(d) => !d.is_empty(),
            Value::ObjectId(_) | Value::DateTime(_) => true,
        }
    }

    /// Converts a JSON value, recognising the extended forms
    /// `{"$oid": "<24 hex>"}`, `{"$date": "<rfc3339>" | millis}` and
    /// `{"$binary": "<hex>"}`.
    #[must_use]
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => {
                if map.len() == 1 {
                    if let Some(special) = extended_json(&map) {
                        return special;
                    }
                }
                Value::Document(
                    map.into_iter()
                        .map(|(k, v)| (k, Value::from_json(v)))
                        .collect(),
                )
            }
        }
    }

    /// Converts to JSON using the same extended forms `from_json` accepts.
    ///
    /// Non-finite floats become `null`; undecoded text is decoded lossily.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::RawString(b) => {
                serde_json::Value::String(String::from_utf8_lossy(b).into_owned())
            }
            Value::Binary(b) => serde_json::json!({ "$binary": hex::encode(b) }),
            Value::ObjectId(oid) => serde_json::json!({ "$oid": hex::encode(oid) }),
            Value::DateTime(t) => {
                serde_json::json!({ "$date": t.to_rfc3339_opts(SecondsFormat::Millis, true) })
            }
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Document(doc) => document_to_json(doc),
        }
    }
}

/// Converts a whole document to a JSON object.
#[must_use]
pub fn document_to_json(doc: &Document) -> serde_json::Value {
    serde_json::Value::Object(
        doc.iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
}

/// Converts a JSON object into a document. Non-object input yields `None`.
#[must_use]
pub fn document_from_json(json: serde_json::Value) -> Option<Document> {
    match Value::from_json(json) {
        Value::Document(doc) => Some(doc),
        _ => None,
    }
}

fn extended_json(map: &serde_json::Map<String, serde_json::Value>) -> Option<Value> {
    let (key, value) = map.iter().next()?;
    match (key.as_str(), value) {
        ("$oid", serde_json::Value::String(hex_id)) => {
            let bytes = hex::decode(hex_id).ok()?;
            let oid: [u8; 12] = bytes.try_into().ok()?;
            Some(Value::ObjectId(oid))
        }
        ("$date", serde_json::Value::String(text)) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|t| Value::DateTime(t.with_timezone(&Utc))),
        ("$date", serde_json::Value::Number(n)) => n
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(Value::DateTime),
        ("$binary", serde_json::Value::String(hex_data)) => {
            hex::decode(hex_data).ok().map(Value::Binary)
        }
        _ => None,
    }
}

fn compare_seq<'a>(
    mut a: impl Iterator<Item = &'a Value>,
    mut b: impl Iterator<Item = &'a Value>,
) -> Ordering {
    loop {
        match (a.next(), b.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => match x.compare(y) {
                Ordering::Equal => {}
                other => return other,
            },
        }
    }
}

/// Orders documents field by field in key order, so documents that are equal
/// regardless of insertion order also compare equal.
fn compare_documents(a: &Document, b: &Document) -> Ordering {
    let mut left: Vec<_> = a.iter().collect();
    let mut right: Vec<_> = b.iter().collect();
    left.sort_unstable_by(|x, y| x.0.cmp(y.0));
    right.sort_unstable_by(|x, y| x.0.cmp(y.0));
    for (left, right) in left.into_iter().zip(right) {
        let ord = left.0.cmp(right.0).then_with(|| left.1.compare(right.1));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

/// Collects every value reachable through a dotted field path.
///
/// Arrays met half-way through the path are descended element by element,
/// so `"tags.name"` reaches the `name` of every document inside `tags`.
/// A missing field yields an empty vector.
#[must_use]
pub fn lookup_path<'a>(doc: &'a Document, path: &str) -> Vec<&'a Value> {
    let mut current: Vec<&'a Value> = Vec::new();
    let mut segments = path.split('.');
    let Some(first) = segments.next() else {
        return current;
    };
    if let Some(v) = doc.get(first) {
        current.push(v);
    }
    for segment in segments {
        let mut next = Vec::new();
        for value in current {
            match value {
                Value::Document(d) => next.extend(d.get(segment)),
                Value::Array(items) => {
                    if let Ok(position) = segment.parse::<usize>() {
                        next.extend(items.get(position));
                    } else {
                        next.extend(
                            items
                                .iter()
                                .filter_map(Value::as_document)
                                .filter_map(|d| d.get(segment)),
                        );
                    }
                }
                _ => {}
            }
        }
        current = next;
    }
    current
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            Value::RawString(b) => f.write_str(&String::from_utf8_lossy(b)),
            other => write_nested(other, f),
        }
    }
}

fn write_nested(value: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match value {
        Value::Null => f.write_str("None"),
        Value::Bool(true) => f.write_str("True"),
        Value::Bool(false) => f.write_str("False"),
        Value::Int(i) => write!(f, "{i}"),
        Value::Float(x) => write!(f, "{x:?}"),
        Value::String(s) => write!(f, "'{s}'"),
        Value::RawString(b) => write!(f, "'{}'", String::from_utf8_lossy(b)),
        Value::Binary(b) => write!(f, "Binary({})", hex::encode(b)),
        Value::ObjectId(oid) => write!(f, "ObjectId('{}')", hex::encode(oid)),
        Value::DateTime(t) => write!(f, "{}", t.format("%Y-%m-%d %H:%M:%S%.f")),
        Value::Array(items) => {
            f.write_str("[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write_nested(item, f)?;
            }
            f.write_str("]")
        }
        Value::Document(doc) => {
            f.write_str("{")?;
            for (i, (k, v)) in doc.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "'{k}': ")?;
                write_nested(v, f)?;
            }
            f.write_str("}")
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Document> for Value {
    fn from(d: Document) -> Self {
        Value::Document(d)
    }
}
