//! Connection-level orchestration of every open view.
//!
//! A [`Session`] tracks the selected host and database, keeps the database
//! and collection listings current, owns the open views (tabs, one side
//! panel, bottom panels) and drives them once per [`Session::tick`].
//!
//! Tick order: database refresh (rate limited), collection existence check,
//! then, unless paused, one poll of the current tab, the side panel and every
//! bottom panel. Failures are logged, reported to the sink, and never stop
//! the next tick.

use std::sync::Arc;

use docwatch_core::{parse_index_spec, Direction, IndexSpec, Namespace, Normalizer, ViewKey, ID_INDEX_NAME};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::WatchError;
use crate::service::config::WatchConfig;
use crate::service::pause::PauseSwitch;
use crate::service::phase::PhaseTracker;
use crate::service::view::{bounded, CollectionView, PollContext, ViewSlot};
use crate::storage::{DataStore, ViewStateStore};
use crate::traits::{Confirmer, UpdateSink};

const CLEAR_PROMPT: &str = "Do you really want to clear this collection?";

/// Shared collaborators a session is built from.
#[derive(Clone)]
pub struct SessionDeps {
    pub state: Arc<dyn ViewStateStore>,
    pub sink: Arc<dyn UpdateSink>,
    pub confirmer: Arc<dyn Confirmer>,
    pub pause: PauseSwitch,
    pub phase: PhaseTracker,
}

struct Connection {
    host: String,
    store: Arc<dyn DataStore>,
    databases: Vec<String>,
    databases_refreshed: Option<Instant>,
    database: Option<String>,
    collections: Vec<String>,
    tabs: Vec<CollectionView>,
    current_tab: Option<String>,
    side: Option<CollectionView>,
    bottoms: Vec<CollectionView>,
    next_bottom: u32,
}

impl Connection {
    fn new(host: String, store: Arc<dyn DataStore>) -> Self {
        Self {
            host,
            store,
            databases: Vec::new(),
            databases_refreshed: None,
            database: None,
            collections: Vec::new(),
            tabs: Vec::new(),
            current_tab: None,
            side: None,
            bottoms: Vec::new(),
            next_bottom: 0,
        }
    }

    fn view_key(&self, collection: &str) -> Result<ViewKey, WatchError> {
        let database = self.database.as_ref().ok_or(WatchError::NoDatabase)?;
        Ok(ViewKey::new(self.host.clone(), database.clone(), collection))
    }

    fn namespace(&self, collection: &str) -> Result<Namespace, WatchError> {
        Ok(self.view_key(collection)?.namespace())
    }

    fn reset_views(&mut self) {
        self.collections.clear();
        self.tabs.clear();
        self.current_tab = None;
        self.side = None;
        self.bottoms.clear();
    }

    fn open_tab(&mut self, collection: &str, state: &dyn ViewStateStore) -> Result<(), WatchError> {
        let key = self.view_key(collection)?;
        state.set_collection_selected(&key.host, &key.database, collection, true);
        if self.tabs.iter().any(|v| v.collection() == collection) {
            return Ok(());
        }
        let preferred = state.active_tab(&key.host, &key.database);
        self.tabs.push(CollectionView::new(key, ViewSlot::Tab));
        if self.current_tab.is_none() || preferred.as_deref() == Some(collection) {
            self.current_tab = Some(collection.to_string());
        }
        info!(collection, "opened tab");
        Ok(())
    }

    /// Drops a tab. `deselect` also removes it from the persisted open set.
    fn close_tab(&mut self, collection: &str, deselect: bool, state: &dyn ViewStateStore) {
        let before = self.tabs.len();
        self.tabs.retain(|v| v.collection() != collection);
        if deselect {
            if let Some(database) = &self.database {
                state.set_collection_selected(&self.host, database, collection, false);
            }
        }
        if self.tabs.len() == before {
            return;
        }
        if self.current_tab.as_deref() == Some(collection) {
            self.current_tab = self.tabs.first().map(|v| v.collection().to_string());
            if deselect {
                if let (Some(database), Some(current)) = (&self.database, &self.current_tab) {
                    state.set_active_tab(&self.host, database, current);
                }
            }
        }
        info!(collection, "closed tab");
    }

    fn close_views_of(&mut self, collection: &str, state: &dyn ViewStateStore) {
        self.close_tab(collection, false, state);
        if self.side.as_ref().is_some_and(|v| v.collection() == collection) {
            self.side = None;
        }
        self.bottoms.retain(|v| v.collection() != collection);
    }

    fn view_mut(&mut self, slot: ViewSlot, collection: &str) -> Result<&mut CollectionView, WatchError> {
        let found = match slot {
            ViewSlot::Tab => self.tabs.iter_mut().find(|v| v.collection() == collection),
            ViewSlot::Side => self.side.as_mut().filter(|v| v.collection() == collection),
            ViewSlot::Bottom(_) => self
                .bottoms
                .iter_mut()
                .find(|v| v.slot() == slot && v.collection() == collection),
        };
        found.ok_or_else(|| WatchError::UnknownView {
            collection: collection.to_string(),
        })
    }
}

/// Poll orchestrator for one connection at a time.
pub struct Session {
    config: WatchConfig,
    deps: SessionDeps,
    normalizer: Normalizer,
    connection: Option<Connection>,
}

fn report(sink: &dyn UpdateSink, scope: &str, err: &WatchError) {
    error!(scope, error = %err, "poll failed");
    sink.on_poll_failed(scope, err);
}

impl Session {
    /// Creates a disconnected session.
    #[must_use]
    pub fn new(config: WatchConfig, deps: SessionDeps) -> Self {
        let normalizer = Normalizer::new(config.time_shift());
        Self {
            config,
            deps,
            normalizer,
            connection: None,
        }
    }

    // -- accessors ----------------------------------------------------------

    #[must_use]
    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.connection.as_ref().map(|c| c.host.as_str())
    }

    /// Known databases, preferred one first.
    #[must_use]
    pub fn databases(&self) -> &[String] {
        self.connection.as_ref().map_or(&[], |c| c.databases.as_slice())
    }

    #[must_use]
    pub fn database(&self) -> Option<&str> {
        self.connection.as_ref()?.database.as_deref()
    }

    /// Collections of the selected database, sorted.
    #[must_use]
    pub fn collections(&self) -> &[String] {
        self.connection.as_ref().map_or(&[], |c| c.collections.as_slice())
    }

    /// Collections with an open tab, in opening order.
    #[must_use]
    pub fn tabs(&self) -> Vec<&str> {
        self.connection
            .as_ref()
            .map(|c| c.tabs.iter().map(CollectionView::collection).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn current_tab(&self) -> Option<&str> {
        self.connection.as_ref()?.current_tab.as_deref()
    }

    #[must_use]
    pub fn side(&self) -> Option<&CollectionView> {
        self.connection.as_ref()?.side.as_ref()
    }

    #[must_use]
    pub fn bottoms(&self) -> &[CollectionView] {
        self.connection.as_ref().map_or(&[], |c| c.bottoms.as_slice())
    }

    /// Looks up an open view.
    #[must_use]
    pub fn view(&self, slot: ViewSlot, collection: &str) -> Option<&CollectionView> {
        let conn = self.connection.as_ref()?;
        match slot {
            ViewSlot::Tab => conn.tabs.iter().find(|v| v.collection() == collection),
            ViewSlot::Side => conn.side.as_ref().filter(|v| v.collection() == collection),
            ViewSlot::Bottom(_) => conn
                .bottoms
                .iter()
                .find(|v| v.slot() == slot && v.collection() == collection),
        }
    }

    #[must_use]
    pub fn pause(&self) -> &PauseSwitch {
        &self.deps.pause
    }

    #[must_use]
    pub fn phase(&self) -> &PhaseTracker {
        &self.deps.phase
    }

    fn conn(&self) -> Result<&Connection, WatchError> {
        self.connection.as_ref().ok_or(WatchError::NotConnected)
    }

    fn conn_mut(&mut self) -> Result<&mut Connection, WatchError> {
        self.connection.as_mut().ok_or(WatchError::NotConnected)
    }

    // -- connection lifecycle -----------------------------------------------

    /// Connects to `host` through `store`, replacing any existing connection.
    ///
    /// # Errors
    ///
    /// Fails if the initial database listing fails; the session then stays
    /// disconnected.
    pub async fn connect(
        &mut self,
        host: impl Into<String>,
        store: Arc<dyn DataStore>,
    ) -> Result<(), WatchError> {
        let host = host.into();
        self.disconnect();
        self.connection = Some(Connection::new(host.clone(), store));
        if let Err(err) = self.refresh_databases(true).await {
            self.connection = None;
            return Err(err);
        }
        self.deps.state.push_host(&host);
        info!(host = %host, "connected");
        Ok(())
    }

    /// Drops the connection and every view.
    pub fn disconnect(&mut self) {
        if let Some(conn) = self.connection.take() {
            info!(host = %conn.host, "disconnected");
        }
    }

    /// Selects a database, persisting it as the host's last database.
    /// Every view is closed; previously open collections reopen from history.
    ///
    /// # Errors
    ///
    /// `NotConnected`, or a failing collection listing.
    pub async fn select_database(&mut self, name: &str) -> Result<(), WatchError> {
        let state = Arc::clone(&self.deps.state);
        let conn = self.conn_mut()?;
        if conn.database.as_deref() == Some(name) {
            return Ok(());
        }
        state.set_last_database(&conn.host, name);
        conn.reset_views();
        conn.database = Some(name.to_string());
        info!(database = name, "selected database");
        self.sync_collections().await
    }

    // -- polling ------------------------------------------------------------

    /// Runs one tick. Never fails; problems are reported to the sink.
    pub async fn tick(&mut self) {
        if self.connection.is_none() {
            return;
        }
        if let Err(err) = self.refresh_databases(false).await {
            report(self.deps.sink.as_ref(), "databases", &err);
        }
        if self.database().is_some() {
            if let Err(err) = self.sync_collections().await {
                report(self.deps.sink.as_ref(), "collections", &err);
            }
        }
        if self.deps.pause.is_paused() {
            return;
        }
        self.poll_views().await;
    }

    async fn refresh_databases(&mut self, force: bool) -> Result<(), WatchError> {
        let refresh = self.config.database_refresh();
        let timeout = self.config.fetch_timeout();
        let state = Arc::clone(&self.deps.state);
        let sink = Arc::clone(&self.deps.sink);
        let conn = self.conn_mut()?;

        let now = Instant::now();
        if !force
            && conn
                .databases_refreshed
                .is_some_and(|at| now.duration_since(at) <= refresh)
        {
            return Ok(());
        }
        conn.databases_refreshed = Some(now);

        let mut names = bounded(timeout, conn.store.list_databases()).await?;
        names.sort();
        let mut known = conn.databases.clone();
        known.sort();
        if names == known {
            return Ok(());
        }
        if let Some(last) = state.last_database(&conn.host) {
            if let Some(pos) = names.iter().position(|n| *n == last) {
                let preferred = names.remove(pos);
                names.insert(0, preferred);
            }
        }
        debug!(databases = ?names, "database listing changed");
        conn.databases = names;
        sink.on_databases(&conn.databases);

        let selected_is_listed = conn
            .database
            .as_ref()
            .is_some_and(|db| conn.databases.contains(db));
        let fallback = conn.databases.first().cloned();
        match fallback {
            Some(first) if !selected_is_listed => self.select_database(&first).await,
            _ => Ok(()),
        }
    }

    async fn sync_collections(&mut self) -> Result<(), WatchError> {
        let timeout = self.config.fetch_timeout();
        let state = Arc::clone(&self.deps.state);
        let sink = Arc::clone(&self.deps.sink);
        let conn = self.conn_mut()?;
        let database = conn.database.clone().ok_or(WatchError::NoDatabase)?;

        let names = bounded(timeout, conn.store.list_collections(&database)).await?;
        let added: Vec<String> = names
            .iter()
            .filter(|n| !conn.collections.contains(n))
            .cloned()
            .collect();
        let removed: Vec<String> = conn
            .collections
            .iter()
            .filter(|n| !names.contains(n))
            .cloned()
            .collect();
        if added.is_empty() && removed.is_empty() {
            return Ok(());
        }
        conn.collections = names;
        for name in &removed {
            conn.close_views_of(name, state.as_ref());
        }
        debug!(database = %database, ?added, ?removed, "collection listing changed");
        sink.on_collections(&database, &added, &removed);

        for name in state.selected_collections(&conn.host, &database) {
            if conn.collections.contains(&name) {
                conn.open_tab(&name, state.as_ref())?;
            }
        }
        Ok(())
    }

    async fn poll_views(&mut self) {
        let Some(conn) = self.connection.as_mut() else {
            return;
        };
        let store = Arc::clone(&conn.store);
        let state = Arc::clone(&self.deps.state);
        let phase = self.deps.phase.clone();
        let ctx = PollContext {
            store: store.as_ref(),
            state: state.as_ref(),
            normalizer: self.normalizer,
            max_results: self.config.max_results,
            fetch_timeout: self.config.fetch_timeout(),
            phase: &phase,
        };

        let mut views: Vec<&mut CollectionView> = Vec::new();
        if let Some(current) = &conn.current_tab {
            views.extend(conn.tabs.iter_mut().find(|v| v.collection() == current));
        }
        views.extend(conn.side.as_mut());
        views.extend(conn.bottoms.iter_mut());

        for view in views {
            match view.poll(&ctx).await {
                Ok(Some(update)) => self.deps.sink.on_view_update(&update),
                Ok(None) => {}
                Err(err) => {
                    let scope = format!("{}:{}", view.slot(), view.collection());
                    report(self.deps.sink.as_ref(), &scope, &err);
                }
            }
        }
    }

    // -- view layout --------------------------------------------------------

    /// Opens a tab and adds it to the persisted open set. The persisted
    /// active tab, or the first tab opened, becomes current.
    ///
    /// # Errors
    ///
    /// `NotConnected` or `NoDatabase`.
    pub fn open_tab(&mut self, collection: &str) -> Result<(), WatchError> {
        let state = Arc::clone(&self.deps.state);
        self.conn_mut()?.open_tab(collection, state.as_ref())
    }

    /// Closes a tab and removes it from the persisted open set.
    ///
    /// # Errors
    ///
    /// `NotConnected`.
    pub fn close_tab(&mut self, collection: &str) -> Result<(), WatchError> {
        let state = Arc::clone(&self.deps.state);
        self.conn_mut()?.close_tab(collection, true, state.as_ref());
        Ok(())
    }

    /// Makes an open tab current and persists it as the active tab.
    ///
    /// # Errors
    ///
    /// `UnknownView` if no tab is open for `collection`.
    pub fn switch_tab(&mut self, collection: &str) -> Result<(), WatchError> {
        let state = Arc::clone(&self.deps.state);
        let conn = self.conn_mut()?;
        if !conn.tabs.iter().any(|v| v.collection() == collection) {
            return Err(WatchError::UnknownView {
                collection: collection.to_string(),
            });
        }
        let key = conn.view_key(collection)?;
        conn.current_tab = Some(collection.to_string());
        state.set_active_tab(&key.host, &key.database, collection);
        Ok(())
    }

    /// Shows `collection` in the side panel, replacing what it showed.
    ///
    /// # Errors
    ///
    /// `NotConnected` or `NoDatabase`.
    pub fn move_to_side(&mut self, collection: &str) -> Result<(), WatchError> {
        let conn = self.conn_mut()?;
        if conn.side.as_ref().is_some_and(|v| v.collection() == collection) {
            return Ok(());
        }
        let key = conn.view_key(collection)?;
        conn.side = Some(CollectionView::new(key, ViewSlot::Side));
        Ok(())
    }

    /// Empties the side panel.
    ///
    /// # Errors
    ///
    /// `NotConnected`.
    pub fn close_side(&mut self) -> Result<(), WatchError> {
        self.conn_mut()?.side = None;
        Ok(())
    }

    /// Opens a bottom panel for `collection` unless one exists. Returns its slot.
    ///
    /// # Errors
    ///
    /// `NotConnected` or `NoDatabase`.
    pub fn add_bottom(&mut self, collection: &str) -> Result<ViewSlot, WatchError> {
        let conn = self.conn_mut()?;
        if let Some(existing) = conn.bottoms.iter().find(|v| v.collection() == collection) {
            return Ok(existing.slot());
        }
        let key = conn.view_key(collection)?;
        let slot = ViewSlot::Bottom(conn.next_bottom);
        conn.next_bottom += 1;
        conn.bottoms.push(CollectionView::new(key, slot));
        Ok(slot)
    }

    /// Closes the bottom panel showing `collection`.
    ///
    /// # Errors
    ///
    /// `NotConnected`.
    pub fn close_bottom(&mut self, collection: &str) -> Result<(), WatchError> {
        self.conn_mut()?.bottoms.retain(|v| v.collection() != collection);
        Ok(())
    }

    // -- per-view events ----------------------------------------------------

    /// Replaces a view's filter.
    ///
    /// # Errors
    ///
    /// `NotConnected` or `UnknownView`.
    pub fn set_filter(&mut self, slot: ViewSlot, collection: &str, text: &str) -> Result<(), WatchError> {
        let state = Arc::clone(&self.deps.state);
        let shift = self.normalizer.shift();
        self.conn_mut()?
            .view_mut(slot, collection)?
            .on_filter_changed(text, state.as_ref(), shift);
        Ok(())
    }

    /// Records a view's sort choice.
    ///
    /// # Errors
    ///
    /// `NotConnected` or `UnknownView`.
    pub fn set_sort(
        &mut self,
        slot: ViewSlot,
        collection: &str,
        field: &str,
        direction: Direction,
    ) -> Result<(), WatchError> {
        let state = Arc::clone(&self.deps.state);
        self.conn_mut()?
            .view_mut(slot, collection)?
            .on_sort_changed(field, direction, state.as_ref());
        Ok(())
    }

    /// Shows or hides one column. Returns whether the field is registered.
    ///
    /// # Errors
    ///
    /// `NotConnected` or `UnknownView`.
    pub fn set_field_visible(
        &mut self,
        slot: ViewSlot,
        collection: &str,
        field: &str,
        visible: bool,
    ) -> Result<bool, WatchError> {
        let state = Arc::clone(&self.deps.state);
        Ok(self
            .conn_mut()?
            .view_mut(slot, collection)?
            .on_field_visibility_changed(field, visible, state.as_ref()))
    }

    /// Shows or hides every column. Returns the fields that changed.
    ///
    /// # Errors
    ///
    /// `NotConnected` or `UnknownView`.
    pub fn set_all_fields_visible(
        &mut self,
        slot: ViewSlot,
        collection: &str,
        visible: bool,
    ) -> Result<Vec<String>, WatchError> {
        let state = Arc::clone(&self.deps.state);
        Ok(self
            .conn_mut()?
            .view_mut(slot, collection)?
            .set_all_visible(visible, state.as_ref()))
    }

    // -- collection maintenance ---------------------------------------------

    /// Removes every document from `collection` after confirmation.
    /// Returns `Ok(false)` if confirmation was declined.
    ///
    /// # Errors
    ///
    /// `NotConnected`, `NoDatabase`, or the store's failure.
    pub async fn clear_collection(&self, collection: &str) -> Result<bool, WatchError> {
        let conn = self.conn()?;
        let ns = conn.namespace(collection)?;
        if !self.deps.confirmer.confirm(CLEAR_PROMPT) {
            debug!(namespace = %ns, "clear declined");
            return Ok(false);
        }
        let removed = bounded(self.config.fetch_timeout(), conn.store.remove(&ns)).await?;
        warn!(namespace = %ns, removed, "cleared collection");
        Ok(true)
    }

    /// Indexes of `collection`, without the identifier index.
    ///
    /// # Errors
    ///
    /// `NotConnected`, `NoDatabase`, or the store's failure.
    pub async fn list_indexes(&self, collection: &str) -> Result<Vec<(String, IndexSpec)>, WatchError> {
        let conn = self.conn()?;
        let ns = conn.namespace(collection)?;
        let indexes = bounded(self.config.fetch_timeout(), conn.store.list_indexes(&ns)).await?;
        Ok(indexes
            .into_iter()
            .filter(|(name, _)| name != ID_INDEX_NAME)
            .collect())
    }

    /// Creates an index from free text such as `('a', 1), ('b', -1)`.
    /// Text that does not parse is ignored and yields `Ok(None)`.
    ///
    /// # Errors
    ///
    /// `NotConnected`, `NoDatabase`, or the store's failure.
    pub async fn create_index(&self, collection: &str, text: &str) -> Result<Option<String>, WatchError> {
        let conn = self.conn()?;
        let ns = conn.namespace(collection)?;
        let Some(spec) = parse_index_spec(text) else {
            debug!(namespace = %ns, text, "ignoring unparseable index text");
            return Ok(None);
        };
        let name = bounded(self.config.fetch_timeout(), conn.store.create_index(&ns, &spec)).await?;
        info!(namespace = %ns, index = %name, "created index");
        Ok(Some(name))
    }

    /// Drops an index after confirmation. The identifier index is never
    /// dropped. Returns `Ok(false)` if nothing was dropped.
    ///
    /// # Errors
    ///
    /// `NotConnected`, `NoDatabase`, or the store's failure.
    pub async fn drop_index(&self, collection: &str, name: &str) -> Result<bool, WatchError> {
        let conn = self.conn()?;
        let ns = conn.namespace(collection)?;
        if name == ID_INDEX_NAME {
            return Ok(false);
        }
        let prompt = format!("Do you really want to drop index {name}?");
        if !self.deps.confirmer.confirm(&prompt) {
            debug!(namespace = %ns, index = name, "drop declined");
            return Ok(false);
        }
        bounded(self.config.fetch_timeout(), conn.store.drop_index(&ns, name)).await?;
        info!(namespace = %ns, index = name, "dropped index");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use docwatch_core::{Document, Value};
    use tokio::sync::mpsc;

    use super::*;
    use crate::service::sink::{ChannelSink, SinkEvent};
    use crate::storage::{JsonViewState, MemoryDataStore, NullDataStore};
    use crate::traits::FixedConfirmer;

    fn doc(id: i64, x: &str) -> Document {
        let mut d = Document::new();
        d.insert("_id".to_string(), Value::Int(id));
        d.insert("x".to_string(), Value::from(x));
        d
    }

    struct Harness {
        session: Session,
        store: Arc<MemoryDataStore>,
        state: Arc<JsonViewState>,
        events: mpsc::Receiver<SinkEvent>,
    }

    fn harness(confirm: bool) -> Harness {
        let store = Arc::new(MemoryDataStore::new());
        let state = Arc::new(JsonViewState::in_memory(10));
        let (sink, events) = ChannelSink::channel(256);
        let deps = SessionDeps {
            state: state.clone(),
            sink: Arc::new(sink),
            confirmer: Arc::new(FixedConfirmer(confirm)),
            pause: PauseSwitch::new(),
            phase: PhaseTracker::new(),
        };
        let config = WatchConfig {
            timestamp_offset_secs: Some(0),
            ..WatchConfig::default()
        };
        Harness {
            session: Session::new(config, deps),
            store,
            state,
            events,
        }
    }

    fn ns(collection: &str) -> Namespace {
        Namespace::new("app", collection)
    }

    fn drain(events: &mut mpsc::Receiver<SinkEvent>) -> Vec<SinkEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    fn view_updates(events: &[SinkEvent]) -> Vec<&crate::service::sink::ViewUpdate> {
        events
            .iter()
            .filter_map(|e| match e {
                SinkEvent::View(u) => Some(u),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn disconnected_tick_is_a_no_op() {
        let mut h = harness(true);
        h.session.tick().await;
        assert!(!h.session.is_connected());
        assert!(drain(&mut h.events).is_empty());
        assert!(matches!(h.session.open_tab("x"), Err(WatchError::NotConnected)));
    }

    #[tokio::test]
    async fn connect_lists_databases_and_auto_selects() {
        let mut h = harness(true);
        h.store.create_collection(&ns("users"));
        h.store.create_collection(&Namespace::new("zeta", "logs"));
        h.state.set_last_database("mem", "zeta");

        h.session.connect("mem", h.store.clone()).await.unwrap();
        assert_eq!(h.session.host(), Some("mem"));
        assert_eq!(h.session.databases(), ["zeta", "app"]);
        assert_eq!(h.session.database(), Some("zeta"));
        assert_eq!(h.session.collections(), ["logs"]);
        assert_eq!(h.state.hosts(), vec!["mem"]);

        let events = drain(&mut h.events);
        assert!(events.contains(&SinkEvent::Databases(vec!["zeta".into(), "app".into()])));
    }

    #[tokio::test]
    async fn failing_connect_stays_disconnected() {
        struct Broken;
        #[async_trait::async_trait]
        impl DataStore for Broken {
            async fn list_databases(&self) -> anyhow::Result<Vec<String>> {
                anyhow::bail!("connection refused")
            }
            async fn list_collections(&self, _d: &str) -> anyhow::Result<Vec<String>> {
                Ok(Vec::new())
            }
            async fn count(&self, _n: &Namespace, _c: &docwatch_core::Criteria) -> anyhow::Result<usize> {
                Ok(0)
            }
            async fn find(
                &self,
                _n: &Namespace,
                _o: &docwatch_core::FindOptions,
            ) -> anyhow::Result<Vec<Document>> {
                Ok(Vec::new())
            }
            async fn remove(&self, _n: &Namespace) -> anyhow::Result<usize> {
                Ok(0)
            }
            async fn list_indexes(&self, _n: &Namespace) -> anyhow::Result<Vec<(String, IndexSpec)>> {
                Ok(Vec::new())
            }
            async fn create_index(&self, _n: &Namespace, s: &IndexSpec) -> anyhow::Result<String> {
                Ok(s.name())
            }
            async fn drop_index(&self, _n: &Namespace, _name: &str) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let mut h = harness(true);
        let err = h.session.connect("down", Arc::new(Broken)).await.unwrap_err();
        assert!(matches!(err, WatchError::Store(_)));
        assert!(!h.session.is_connected());
        assert!(h.state.hosts().is_empty());
    }

    #[tokio::test]
    async fn polls_current_tab_and_reports_changes() {
        let mut h = harness(true);
        h.store.insert(&ns("users"), doc(1, "a"));
        h.store.insert(&ns("jobs"), doc(7, "j"));
        h.session.connect("mem", h.store.clone()).await.unwrap();
        h.session.open_tab("users").unwrap();
        h.session.open_tab("jobs").unwrap();
        assert_eq!(h.session.current_tab(), Some("users"));
        drain(&mut h.events);

        h.session.tick().await;
        let events = drain(&mut h.events);
        let updates = view_updates(&events);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].collection, "users");
        assert_eq!(updates[0].changes.created.len(), 1);

        h.store.insert(&ns("users"), doc(2, "b"));
        h.session.tick().await;
        let events = drain(&mut h.events);
        let updates = view_updates(&events);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].changes.created.len(), 1);
        assert_eq!(updates[0].changes.unchanged.len(), 1);

        // Unchanged data yields nothing.
        h.session.tick().await;
        assert!(view_updates(&drain(&mut h.events)).is_empty());
    }

    #[tokio::test]
    async fn pause_skips_views_but_keeps_existence_checks() {
        let mut h = harness(true);
        h.store.insert(&ns("users"), doc(1, "a"));
        h.session.connect("mem", h.store.clone()).await.unwrap();
        h.session.open_tab("users").unwrap();
        drain(&mut h.events);

        h.session.pause().set_paused(true);
        h.store.create_collection(&ns("audit"));
        h.session.tick().await;

        let events = drain(&mut h.events);
        assert!(view_updates(&events).is_empty());
        assert!(events.iter().any(|e| matches!(
            e,
            SinkEvent::Collections { added, .. } if added == &["audit".to_string()]
        )));
        assert_eq!(h.session.collections(), ["audit", "users"]);

        h.session.pause().set_paused(false);
        h.session.tick().await;
        assert_eq!(view_updates(&drain(&mut h.events)).len(), 1);
    }

    #[tokio::test]
    async fn vanished_collection_closes_views_and_history_reopens_them() {
        let mut h = harness(true);
        h.store.insert(&ns("users"), doc(1, "a"));
        h.session.connect("mem", h.store.clone()).await.unwrap();
        h.session.open_tab("users").unwrap();
        h.session.move_to_side("users").unwrap();
        h.session.add_bottom("users").unwrap();

        h.store.drop_collection(&ns("users"));
        h.session.tick().await;
        assert!(h.session.tabs().is_empty());
        assert!(h.session.side().is_none());
        assert!(h.session.bottoms().is_empty());
        // Still remembered as selected.
        assert_eq!(h.state.selected_collections("mem", "app"), vec!["users"]);

        h.store.insert(&ns("users"), doc(2, "b"));
        h.session.tick().await;
        assert_eq!(h.session.tabs(), vec!["users"]);
    }

    #[tokio::test]
    async fn persisted_active_tab_becomes_current() {
        let mut h = harness(true);
        for name in ["a", "b", "c"] {
            h.store.create_collection(&ns(name));
        }
        h.state.set_collection_selected("mem", "app", "a", true);
        h.state.set_collection_selected("mem", "app", "c", true);
        h.state.set_active_tab("mem", "app", "c");

        h.session.connect("mem", h.store.clone()).await.unwrap();
        assert_eq!(h.session.tabs(), vec!["a", "c"]);
        assert_eq!(h.session.current_tab(), Some("c"));

        h.session.switch_tab("a").unwrap();
        assert_eq!(h.state.active_tab("mem", "app").as_deref(), Some("a"));
        assert!(matches!(
            h.session.switch_tab("b"),
            Err(WatchError::UnknownView { .. })
        ));

        h.session.close_tab("a").unwrap();
        assert_eq!(h.session.current_tab(), Some("c"));
        assert_eq!(h.state.selected_collections("mem", "app"), vec!["c"]);
    }

    #[tokio::test]
    async fn side_and_bottom_panels_poll_independently() {
        let mut h = harness(true);
        h.store.insert(&ns("users"), doc(1, "a"));
        h.store.insert(&ns("jobs"), doc(1, "j"));
        h.session.connect("mem", h.store.clone()).await.unwrap();
        h.session.open_tab("users").unwrap();
        h.session.move_to_side("users").unwrap();
        let slot = h.session.add_bottom("jobs").unwrap();
        assert_eq!(slot, ViewSlot::Bottom(0));
        assert_eq!(h.session.add_bottom("jobs").unwrap(), slot);
        drain(&mut h.events);

        h.session.tick().await;
        let events = drain(&mut h.events);
        let mut slots: Vec<_> = view_updates(&events).iter().map(|u| u.slot).collect();
        slots.sort_by_key(ToString::to_string);
        assert_eq!(slots, vec![ViewSlot::Bottom(0), ViewSlot::Side, ViewSlot::Tab]);

        h.session
            .set_filter(ViewSlot::Side, "users", "'x': 'zzz'")
            .unwrap();
        h.session.tick().await;
        let events = drain(&mut h.events);
        let updates = view_updates(&events);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].slot, ViewSlot::Side);
        assert_eq!(updates[0].changes.deleted.len(), 1);
        assert_eq!(updates[0].hints, " - Filtering - total(0)");

        h.session.close_side().unwrap();
        h.session.close_bottom("jobs").unwrap();
        assert!(h.session.side().is_none());
        assert!(h.session.bottoms().is_empty());
    }

    #[tokio::test]
    async fn per_view_commands_need_an_open_view() {
        let mut h = harness(true);
        h.store.insert(&ns("users"), doc(1, "a"));
        h.session.connect("mem", h.store.clone()).await.unwrap();
        assert!(matches!(
            h.session.set_filter(ViewSlot::Tab, "users", "x: 1"),
            Err(WatchError::UnknownView { .. })
        ));

        h.session.open_tab("users").unwrap();
        h.session.tick().await;
        h.session
            .set_sort(ViewSlot::Tab, "users", "x", Direction::Descending)
            .unwrap();
        assert!(h
            .session
            .set_field_visible(ViewSlot::Tab, "users", "x", false)
            .unwrap());
        let shown = h
            .session
            .set_all_fields_visible(ViewSlot::Tab, "users", true)
            .unwrap();
        assert_eq!(shown, vec!["x"]);
        let key = ViewKey::new("mem", "app", "users");
        assert_eq!(h.state.sort(&key).unwrap().field, "x");
        assert!(h
            .session
            .view(ViewSlot::Tab, "users")
            .unwrap()
            .fields()
            .is_visible("x"));
    }

    #[tokio::test]
    async fn clear_requires_confirmation() {
        let mut declined = harness(false);
        declined.store.insert(&ns("users"), doc(1, "a"));
        declined.session.connect("mem", declined.store.clone()).await.unwrap();
        assert!(!declined.session.clear_collection("users").await.unwrap());
        assert_eq!(
            declined
                .store
                .count(&ns("users"), &docwatch_core::Criteria::match_all())
                .await
                .unwrap(),
            1
        );

        let mut approved = harness(true);
        approved.store.insert(&ns("users"), doc(1, "a"));
        approved.session.connect("mem", approved.store.clone()).await.unwrap();
        assert!(approved.session.clear_collection("users").await.unwrap());
        assert_eq!(
            approved
                .store
                .count(&ns("users"), &docwatch_core::Criteria::match_all())
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn index_commands() {
        let mut h = harness(true);
        h.store.create_collection(&ns("users"));
        h.session.connect("mem", h.store.clone()).await.unwrap();

        assert_eq!(h.session.create_index("users", "not an index").await.unwrap(), None);
        let name = h
            .session
            .create_index("users", "('ready_time', 1), ('finish_time', -1)")
            .await
            .unwrap();
        assert_eq!(name.as_deref(), Some("ready_time_1_finish_time_-1"));

        let listed = h.session.list_indexes("users").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, "ready_time_1_finish_time_-1");

        assert!(!h.session.drop_index("users", "_id_").await.unwrap());
        assert!(h
            .session
            .drop_index("users", "ready_time_1_finish_time_-1")
            .await
            .unwrap());
        assert!(h.session.list_indexes("users").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn declined_index_drop_keeps_index() {
        let mut h = harness(false);
        h.store.create_collection(&ns("users"));
        h.session.connect("mem", h.store.clone()).await.unwrap();
        h.session.create_index("users", "('a', 1)").await.unwrap();
        assert!(!h.session.drop_index("users", "a_1").await.unwrap());
        assert_eq!(h.session.list_indexes("users").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn select_database_resets_views() {
        let mut h = harness(true);
        h.store.insert(&ns("users"), doc(1, "a"));
        h.store.create_collection(&Namespace::new("other", "logs"));
        h.session.connect("mem", h.store.clone()).await.unwrap();
        assert_eq!(h.session.database(), Some("app"));
        h.session.open_tab("users").unwrap();

        h.session.select_database("other").await.unwrap();
        assert!(h.session.tabs().is_empty());
        assert_eq!(h.session.collections(), ["logs"]);
        assert_eq!(h.state.last_database("mem").as_deref(), Some("other"));

        h.session.disconnect();
        assert!(!h.session.is_connected());
        assert!(h.session.databases().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn database_refresh_is_rate_limited() {
        let mut h = harness(true);
        h.store.create_collection(&ns("users"));
        h.session.connect("mem", h.store.clone()).await.unwrap();
        drain(&mut h.events);

        h.store.create_collection(&Namespace::new("new_db", "c"));
        h.session.tick().await;
        assert_eq!(h.session.databases(), ["app"]);

        tokio::time::advance(std::time::Duration::from_millis(5_001)).await;
        h.session.tick().await;
        assert_eq!(h.session.databases(), ["app", "new_db"]);
        assert_eq!(h.session.database(), Some("app"));
    }

    #[tokio::test]
    async fn null_store_connects_with_nothing_to_show() {
        let mut h = harness(true);
        h.session.connect("null", Arc::new(NullDataStore)).await.unwrap();
        assert!(h.session.databases().is_empty());
        assert!(h.session.database().is_none());
        h.session.tick().await;
        assert!(matches!(h.session.open_tab("x"), Err(WatchError::NoDatabase)));
    }
}
