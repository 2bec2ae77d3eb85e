//! Document normalizer.
//!
//! Turns a raw document, as handed back by the data store, into the form the
//! differ compares: undecoded text becomes UTF-8 strings and timestamps are
//! moved from stored time to display time. Two polls of the same unchanged
//! record therefore always normalize to equal documents.

use chrono::{DateTime, Local, TimeDelta, Utc};

use crate::types::{Document, Value};

/// Fixed offset between the store's time representation and display time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeShift {
    offset: TimeDelta,
}

impl TimeShift {
    /// No shift: stored time is displayed as-is.
    #[must_use]
    pub fn zero() -> Self {
        Self {
            offset: TimeDelta::zero(),
        }
    }

    /// Shift by a signed number of seconds. Out-of-range values mean no shift.
    #[must_use]
    pub fn from_secs(secs: i64) -> Self {
        Self {
            offset: TimeDelta::try_seconds(secs).unwrap_or_else(TimeDelta::zero),
        }
    }

    /// Shift from UTC to the local wall clock of this process.
    #[must_use]
    pub fn local() -> Self {
        Self::from_secs(i64::from(Local::now().offset().local_minus_utc()))
    }

    /// Offset in whole seconds.
    #[must_use]
    pub fn as_secs(&self) -> i64 {
        self.offset.num_seconds()
    }

    /// Stored time to display time. Overflow leaves the value untouched.
    #[must_use]
    pub fn to_display(&self, stored: DateTime<Utc>) -> DateTime<Utc> {
        stored.checked_add_signed(self.offset).unwrap_or(stored)
    }

    /// Display time back to stored time. Overflow leaves the value untouched.
    #[must_use]
    pub fn to_stored(&self, display: DateTime<Utc>) -> DateTime<Utc> {
        display.checked_sub_signed(self.offset).unwrap_or(display)
    }
}

impl Default for TimeShift {
    fn default() -> Self {
        Self::zero()
    }
}

/// Canonicalizes raw documents. Pure and infallible.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer {
    shift: TimeShift,
}

impl Normalizer {
    /// Creates a normalizer applying the given time shift.
    #[must_use]
    pub fn new(shift: TimeShift) -> Self {
        Self { shift }
    }

    /// The time shift this normalizer applies.
    #[must_use]
    pub fn shift(&self) -> TimeShift {
        self.shift
    }

    /// Normalizes every field of `raw`, recursing into nested documents and arrays.
    #[must_use]
    pub fn normalize(&self, raw: Document) -> Document {
        raw.into_iter()
            .map(|(key, value)| (key, self.normalize_value(value)))
            .collect()
    }

    /// Normalizes a single value.
    #[must_use]
    pub fn normalize_value(&self, value: Value) -> Value {
        match value {
            Value::RawString(bytes) => match String::from_utf8(bytes) {
                Ok(text) => Value::String(text),
                Err(err) => Value::RawString(err.into_bytes()),
            },
            Value::DateTime(t) => Value::DateTime(self.shift.to_display(t)),
            Value::Document(doc) => Value::Document(self.normalize(doc)),
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| self.normalize_value(item))
                    .collect(),
            ),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2012, 5, 1, h, 0, 0).unwrap()
    }

    #[test]
    fn raw_text_is_decoded() {
        let n = Normalizer::default();
        let out = n.normalize_value(Value::RawString("héllo".as_bytes().to_vec()));
        assert_eq!(out, Value::String("héllo".into()));
    }

    #[test]
    fn invalid_text_passes_through() {
        let n = Normalizer::default();
        let bytes = vec![0xff, 0xfe, b'a'];
        let out = n.normalize_value(Value::RawString(bytes.clone()));
        assert_eq!(out, Value::RawString(bytes));
    }

    #[test]
    fn timestamps_shift_to_display_time() {
        let n = Normalizer::new(TimeShift::from_secs(8 * 3600));
        assert_eq!(n.normalize_value(Value::DateTime(at(1))), Value::DateTime(at(9)));
    }

    #[test]
    fn nested_documents_and_arrays_are_normalized() {
        let n = Normalizer::new(TimeShift::from_secs(3600));
        let inner: Document = [("t".to_string(), Value::DateTime(at(1)))].into_iter().collect();
        let raw: Document = [
            ("_id".to_string(), Value::Int(1)),
            ("meta".to_string(), Value::Document(inner)),
            (
                "names".to_string(),
                Value::Array(vec![Value::RawString(b"a".to_vec())]),
            ),
        ]
        .into_iter()
        .collect();

        let out = n.normalize(raw);
        let meta = out["meta"].as_document().unwrap();
        assert_eq!(meta["t"], Value::DateTime(at(2)));
        assert_eq!(out["names"], Value::Array(vec![Value::String("a".into())]));
        assert_eq!(out["_id"], Value::Int(1));
    }

    #[test]
    fn normalization_is_deterministic() {
        let n = Normalizer::new(TimeShift::from_secs(-1800));
        let raw: Document = [("t".to_string(), Value::DateTime(at(5)))].into_iter().collect();
        assert_eq!(n.normalize(raw.clone()), n.normalize(raw));
    }

    #[test]
    fn shift_round_trips_between_stored_and_display() {
        let shift = TimeShift::from_secs(-5 * 3600);
        assert_eq!(shift.to_stored(shift.to_display(at(12))), at(12));
        assert_eq!(shift.as_secs(), -5 * 3600);
    }
}
