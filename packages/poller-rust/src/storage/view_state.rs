//! Persisted per-view presentation state.
//!
//! [`ViewStateStore`] remembers what a user chose for each view across
//! restarts: sort, visible columns, filter history, and per-host/per-database
//! selections. [`JsonViewState`] keeps the state in memory and optionally
//! writes it through to a JSON file after every change.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use docwatch_core::{SortKey, ViewKey};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::warn;

/// Key-value store for view preferences, keyed by host / database / collection.
///
/// Used as `Arc<dyn ViewStateStore>`. Writes are best-effort: a failure to
/// persist never affects polling.
pub trait ViewStateStore: Send + Sync {
    /// Last selected sort for a view.
    fn sort(&self, key: &ViewKey) -> Option<SortKey>;

    /// Records the sort selected for a view.
    fn set_sort(&self, key: &ViewKey, sort: SortKey);

    /// Column names the user left visible. Empty means no history.
    fn visible_columns(&self, key: &ViewKey) -> Vec<String>;

    /// Adds or removes one column in the visibility history.
    fn set_column_visible(&self, key: &ViewKey, field: &str, visible: bool);

    /// Filter texts, most recent first.
    fn filter_history(&self, key: &ViewKey) -> Vec<String>;

    /// Moves `text` to the front of the filter history, dropping duplicates
    /// and entries beyond the history cap.
    fn push_filter(&self, key: &ViewKey, text: &str);

    /// Collection whose tab was last active on `host`/`database`.
    fn active_tab(&self, host: &str, database: &str) -> Option<String>;

    /// Records the active tab.
    fn set_active_tab(&self, host: &str, database: &str, collection: &str);

    /// Database last selected on `host`.
    fn last_database(&self, host: &str) -> Option<String>;

    /// Records the selected database.
    fn set_last_database(&self, host: &str, database: &str);

    /// Collections the user had open on `host`/`database`, in opening order.
    fn selected_collections(&self, host: &str, database: &str) -> Vec<String>;

    /// Adds or removes a collection from the open set.
    fn set_collection_selected(&self, host: &str, database: &str, collection: &str, selected: bool);

    /// Hosts connected to, most recent first.
    fn hosts(&self) -> Vec<String>;

    /// Moves `host` to the front of the host history.
    fn push_host(&self, host: &str);
}

/// Preferences of one collection view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewPrefs {
    /// Last selected sort.
    pub sort: Option<SortKey>,
    /// Visible-column history.
    pub columns: Vec<String>,
    /// Filter history, most recent first.
    pub filters: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
struct DatabasePrefs {
    active_tab: Option<String>,
    collections: Vec<String>,
    views: BTreeMap<String, ViewPrefs>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
struct HostPrefs {
    last_database: Option<String>,
    databases: BTreeMap<String, DatabasePrefs>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
struct StateDocument {
    hosts: Vec<String>,
    by_host: BTreeMap<String, HostPrefs>,
}

impl StateDocument {
    fn database(&self, host: &str, database: &str) -> Option<&DatabasePrefs> {
        self.by_host.get(host)?.databases.get(database)
    }

    fn database_mut(&mut self, host: &str, database: &str) -> &mut DatabasePrefs {
        self.by_host
            .entry(host.to_string())
            .or_default()
            .databases
            .entry(database.to_string())
            .or_default()
    }

    fn view(&self, key: &ViewKey) -> Option<&ViewPrefs> {
        self.database(&key.host, &key.database)?
            .views
            .get(&key.collection)
    }

    fn view_mut(&mut self, key: &ViewKey) -> &mut ViewPrefs {
        self.database_mut(&key.host, &key.database)
            .views
            .entry(key.collection.clone())
            .or_default()
    }
}

/// Moves `item` to the front of `history`, deduplicating and capping it.
fn push_front(history: &mut Vec<String>, item: &str, cap: usize) {
    history.retain(|existing| existing != item);
    history.insert(0, item.to_string());
    history.truncate(cap.max(1));
}

/// In-memory view state with optional JSON write-through.
pub struct JsonViewState {
    state: RwLock<StateDocument>,
    path: Option<PathBuf>,
    max_history: usize,
}

impl JsonViewState {
    /// State that lives only as long as this value.
    #[must_use]
    pub fn in_memory(max_history: usize) -> Self {
        Self {
            state: RwLock::new(StateDocument::default()),
            path: None,
            max_history,
        }
    }

    /// Loads state from `path`, starting empty if the file does not exist.
    /// Every later change is written back to the same file.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>, max_history: usize) -> anyhow::Result<Self> {
        let path = path.into();
        let state = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("parsing view state {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StateDocument::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("reading view state {}", path.display()))
            }
        };
        Ok(Self {
            state: RwLock::new(state),
            path: Some(path),
            max_history,
        })
    }

    /// The file this state is persisted to, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Preferences of one view, as currently held.
    #[must_use]
    pub fn view_prefs(&self, key: &ViewKey) -> ViewPrefs {
        self.state.read().view(key).cloned().unwrap_or_default()
    }

    fn update(&self, apply: impl FnOnce(&mut StateDocument)) {
        let snapshot = {
            let mut state = self.state.write();
            apply(&mut state);
            self.path.as_ref().map(|_| state.clone())
        };
        if let (Some(path), Some(snapshot)) = (&self.path, snapshot) {
            if let Err(err) = persist_off_reactor(path, &snapshot) {
                warn!(path = %path.display(), error = %err, "failed to persist view state");
            }
        }
    }
}

/// Writes the state file. On a multi-threaded runtime the write runs under
/// `block_in_place` so queued tasks migrate off this worker; elsewhere it
/// writes inline.
fn persist_off_reactor(path: &Path, state: &StateDocument) -> anyhow::Result<()> {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| persist(path, state))
        }
        _ => persist(path, state),
    }
}

fn persist(path: &Path, state: &StateDocument) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let staging = path.with_extension("json.tmp");
    std::fs::write(&staging, serde_json::to_vec_pretty(state)?)?;
    std::fs::rename(&staging, path)?;
    Ok(())
}

impl ViewStateStore for JsonViewState {
    fn sort(&self, key: &ViewKey) -> Option<SortKey> {
        self.state.read().view(key)?.sort.clone()
    }

    fn set_sort(&self, key: &ViewKey, sort: SortKey) {
        self.update(|state| state.view_mut(key).sort = Some(sort));
    }

    fn visible_columns(&self, key: &ViewKey) -> Vec<String> {
        self.state
            .read()
            .view(key)
            .map(|v| v.columns.clone())
            .unwrap_or_default()
    }

    fn set_column_visible(&self, key: &ViewKey, field: &str, visible: bool) {
        let present = self.visible_columns(key).iter().any(|c| c == field);
        if present == visible {
            return;
        }
        self.update(|state| {
            let columns = &mut state.view_mut(key).columns;
            if visible {
                columns.push(field.to_string());
            } else {
                columns.retain(|c| c != field);
            }
        });
    }

    fn filter_history(&self, key: &ViewKey) -> Vec<String> {
        self.state
            .read()
            .view(key)
            .map(|v| v.filters.clone())
            .unwrap_or_default()
    }

    fn push_filter(&self, key: &ViewKey, text: &str) {
        let cap = self.max_history;
        self.update(|state| push_front(&mut state.view_mut(key).filters, text, cap));
    }

    fn active_tab(&self, host: &str, database: &str) -> Option<String> {
        self.state.read().database(host, database)?.active_tab.clone()
    }

    fn set_active_tab(&self, host: &str, database: &str, collection: &str) {
        if self.active_tab(host, database).as_deref() == Some(collection) {
            return;
        }
        self.update(|state| {
            state.database_mut(host, database).active_tab = Some(collection.to_string());
        });
    }

    fn last_database(&self, host: &str) -> Option<String> {
        self.state.read().by_host.get(host)?.last_database.clone()
    }

    fn set_last_database(&self, host: &str, database: &str) {
        self.update(|state| {
            state.by_host.entry(host.to_string()).or_default().last_database =
                Some(database.to_string());
        });
    }

    fn selected_collections(&self, host: &str, database: &str) -> Vec<String> {
        self.state
            .read()
            .database(host, database)
            .map(|d| d.collections.clone())
            .unwrap_or_default()
    }

    fn set_collection_selected(&self, host: &str, database: &str, collection: &str, selected: bool) {
        let present = self
            .selected_collections(host, database)
            .iter()
            .any(|c| c == collection);
        if present == selected {
            return;
        }
        self.update(|state| {
            let collections = &mut state.database_mut(host, database).collections;
            if selected {
                collections.push(collection.to_string());
            } else {
                collections.retain(|c| c != collection);
            }
        });
    }

    fn hosts(&self) -> Vec<String> {
        self.state.read().hosts.clone()
    }

    fn push_host(&self, host: &str) {
        let cap = self.max_history;
        self.update(|state| push_front(&mut state.hosts, host, cap));
    }
}

#[cfg(test)]
mod tests {
    use docwatch_core::Direction;

    use super::*;

    fn key(collection: &str) -> ViewKey {
        ViewKey::new("localhost", "app", collection)
    }

    #[test]
    fn unknown_views_have_no_state() {
        let state = JsonViewState::in_memory(10);
        assert!(state.sort(&key("users")).is_none());
        assert!(state.visible_columns(&key("users")).is_empty());
        assert!(state.filter_history(&key("users")).is_empty());
        assert!(state.active_tab("localhost", "app").is_none());
        assert!(state.last_database("localhost").is_none());
        assert!(state.hosts().is_empty());
        assert!(state.path().is_none());
    }

    #[test]
    fn column_history_adds_and_removes() {
        let state = JsonViewState::in_memory(10);
        state.set_column_visible(&key("users"), "name", true);
        state.set_column_visible(&key("users"), "age", true);
        state.set_column_visible(&key("users"), "name", true);
        assert_eq!(state.visible_columns(&key("users")), vec!["name", "age"]);

        state.set_column_visible(&key("users"), "name", false);
        assert_eq!(state.visible_columns(&key("users")), vec!["age"]);
        assert!(state.visible_columns(&key("jobs")).is_empty());
    }

    #[test]
    fn filter_history_is_most_recent_first_and_capped() {
        let state = JsonViewState::in_memory(3);
        for text in ["a: 1", "b: 2", "c: 3", "a: 1", "d: 4"] {
            state.push_filter(&key("users"), text);
        }
        assert_eq!(
            state.filter_history(&key("users")),
            vec!["d: 4", "a: 1", "c: 3"]
        );
    }

    #[test]
    fn host_and_database_selections() {
        let state = JsonViewState::in_memory(10);
        state.push_host("a");
        state.push_host("b");
        state.push_host("a");
        assert_eq!(state.hosts(), vec!["a", "b"]);

        state.set_last_database("a", "app");
        state.set_active_tab("a", "app", "users");
        state.set_collection_selected("a", "app", "users", true);
        state.set_collection_selected("a", "app", "jobs", true);
        state.set_collection_selected("a", "app", "users", false);

        assert_eq!(state.last_database("a").as_deref(), Some("app"));
        assert_eq!(state.active_tab("a", "app").as_deref(), Some("users"));
        assert_eq!(state.selected_collections("a", "app"), vec!["jobs"]);
        assert!(state.selected_collections("b", "app").is_empty());
    }

    #[test]
    fn writes_through_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/state.json");
        {
            let state = JsonViewState::open(&path, 10).unwrap();
            state.set_sort(&key("users"), SortKey::new("age", Direction::Descending));
            state.set_column_visible(&key("users"), "age", true);
            state.push_filter(&key("users"), "'age': {'$gt': 3}");
            state.set_last_database("localhost", "app");
        }
        assert!(path.exists());

        let reloaded = JsonViewState::open(&path, 10).unwrap();
        assert_eq!(
            reloaded.sort(&key("users")),
            Some(SortKey::new("age", Direction::Descending))
        );
        let prefs = reloaded.view_prefs(&key("users"));
        assert_eq!(prefs.columns, vec!["age"]);
        assert_eq!(prefs.filters, vec!["'age': {'$gt': 3}"]);
        assert_eq!(reloaded.last_database("localhost").as_deref(), Some("app"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn writes_through_from_async_workers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let state = std::sync::Arc::new(JsonViewState::open(&path, 10).unwrap());

        let writer = std::sync::Arc::clone(&state);
        tokio::spawn(async move {
            writer.set_column_visible(&key("users"), "age", true);
            writer.set_last_database("localhost", "app");
        })
        .await
        .unwrap();

        let reloaded = JsonViewState::open(&path, 10).unwrap();
        assert_eq!(reloaded.visible_columns(&key("users")), vec!["age"]);
        assert_eq!(reloaded.last_database("localhost").as_deref(), Some("app"));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn writes_through_on_current_thread_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let state = JsonViewState::open(&path, 10).unwrap();
        state.push_filter(&key("users"), "'age': 3");

        let reloaded = JsonViewState::open(&path, 10).unwrap();
        assert_eq!(reloaded.filter_history(&key("users")), vec!["'age': 3"]);
    }

    #[test]
    fn corrupt_file_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(JsonViewState::open(&path, 10).is_err());
    }

    mod props {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn filter_history_is_capped_deduplicated_and_recent_first(
                cap in 1usize..6,
                texts in proptest::collection::vec("[a-d]{1,2}", 1..30),
            ) {
                let state = JsonViewState::in_memory(cap);
                for text in &texts {
                    state.push_filter(&key("users"), text);
                }
                let history = state.filter_history(&key("users"));
                prop_assert!(history.len() <= cap);
                prop_assert_eq!(history.first(), texts.last());
                let mut unique = history.clone();
                unique.sort();
                unique.dedup();
                prop_assert_eq!(unique.len(), history.len());
            }

            #[test]
            fn column_history_matches_last_toggle(
                toggles in proptest::collection::vec(("[xyz]", any::<bool>()), 0..30),
            ) {
                let state = JsonViewState::in_memory(10);
                for (field, visible) in &toggles {
                    state.set_column_visible(&key("users"), field, *visible);
                }
                let columns = state.visible_columns(&key("users"));
                for field in ["x", "y", "z"] {
                    let expected = toggles
                        .iter()
                        .rev()
                        .find(|(f, _)| f == field)
                        .is_some_and(|(_, visible)| *visible);
                    prop_assert_eq!(columns.iter().any(|c| c == field), expected);
                }
            }
        }
    }
}
