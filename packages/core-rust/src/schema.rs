//! Field registry: the columns a view has discovered so far.
//!
//! The registry only ever grows. A field keeps the index it was first
//! assigned for the lifetime of the view, even if later polls stop
//! returning it, so presentation can rely on stable column identity.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::Document;

/// A registered field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Name of the field.
    pub name: String,
    /// Column index, assigned in first-seen order starting at 0.
    pub index: usize,
    /// Whether the column is currently shown.
    pub visible: bool,
}

/// Growing set of fields observed for one view.
#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    fields: Vec<FieldDef>,
    positions: HashMap<String, usize>,
}

impl FieldRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every field in `records` that is not yet known.
    ///
    /// Fields are registered in first-seen order across the whole batch.
    /// `visible_history` is the persisted list of visible columns for the
    /// view: when empty, new fields are visible; otherwise only fields named
    /// in it are. Returns the newly registered names in registration order.
    pub fn observe<'a, I>(&mut self, records: I, visible_history: &[String]) -> Vec<String>
    where
        I: IntoIterator<Item = &'a Document>,
    {
        let mut added = Vec::new();
        for record in records {
            for name in record.keys() {
                if self.positions.contains_key(name) {
                    continue;
                }
                let index = self.fields.len();
                let visible = visible_history.is_empty() || visible_history.contains(name);
                self.positions.insert(name.clone(), index);
                self.fields.push(FieldDef {
                    name: name.clone(),
                    index,
                    visible,
                });
                added.push(name.clone());
            }
        }
        added
    }

    /// All registered fields, ordered by index.
    #[must_use]
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldDef> {
        self.positions.get(name).map(|&i| &self.fields[i])
    }

    /// Whether `name` is registered and visible.
    #[must_use]
    pub fn is_visible(&self, name: &str) -> bool {
        self.get(name).is_some_and(|f| f.visible)
    }

    /// Names of visible fields, in index order.
    pub fn visible_names(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|f| f.visible)
            .map(|f| f.name.as_str())
    }

    /// Shows or hides a registered field. Returns `true` if the flag changed.
    pub fn set_visible(&mut self, name: &str, visible: bool) -> bool {
        match self.positions.get(name) {
            Some(&i) if self.fields[i].visible != visible => {
                self.fields[i].visible = visible;
                true
            }
            _ => false,
        }
    }

    /// Number of registered fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no field has been registered yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::types::Value;

    fn record(fields: &[&str]) -> Document {
        fields
            .iter()
            .map(|f| ((*f).to_string(), Value::Null))
            .collect()
    }

    #[test]
    fn registers_in_first_seen_order() {
        let mut reg = FieldRegistry::new();
        let batch = vec![record(&["_id", "x"]), record(&["_id", "y", "x", "z"])];
        let added = reg.observe(&batch, &[]);
        assert_eq!(added, vec!["_id", "x", "y", "z"]);
        assert_eq!(reg.get("z").unwrap().index, 3);
    }

    #[test]
    fn known_fields_are_skipped() {
        let mut reg = FieldRegistry::new();
        reg.observe(&[record(&["_id", "x"])], &[]);
        let added = reg.observe(&[record(&["x", "w"])], &[]);
        assert_eq!(added, vec!["w"]);
    }

    #[test]
    fn fields_are_never_dropped() {
        let mut reg = FieldRegistry::new();
        reg.observe(&[record(&["_id", "gone"])], &[]);
        reg.observe(&[record(&["_id"])], &[]);
        assert!(reg.get("gone").is_some());
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn history_limits_default_visibility() {
        let mut reg = FieldRegistry::new();
        let history = vec!["x".to_string()];
        reg.observe(&[record(&["_id", "x", "y"])], &history);
        assert!(reg.is_visible("x"));
        assert!(!reg.is_visible("_id"));
        assert!(!reg.is_visible("y"));
        assert_eq!(reg.visible_names().collect::<Vec<_>>(), vec!["x"]);
    }

    #[test]
    fn set_visible_reports_changes() {
        let mut reg = FieldRegistry::new();
        reg.observe(&[record(&["a"])], &[]);
        assert!(!reg.set_visible("a", true));
        assert!(reg.set_visible("a", false));
        assert!(!reg.is_visible("a"));
        assert!(!reg.set_visible("missing", true));
    }

    fn batches() -> impl Strategy<Value = Vec<Vec<Document>>> {
        let field = prop::sample::select(vec!["_id", "a", "b", "c", "d", "e"]);
        let rec = prop::collection::vec(field, 0..5).prop_map(|names| record(&names));
        prop::collection::vec(prop::collection::vec(rec, 0..4), 0..6)
    }

    proptest! {
        #[test]
        fn registry_is_monotonic(polls in batches()) {
            let mut reg = FieldRegistry::new();
            let mut seen: Vec<FieldDef> = Vec::new();
            for batch in &polls {
                reg.observe(batch, &[]);
                prop_assert!(reg.len() >= seen.len());
                for def in &seen {
                    prop_assert_eq!(reg.get(&def.name).map(|f| f.index), Some(def.index));
                }
                seen = reg.fields().to_vec();
            }
        }
    }
}
