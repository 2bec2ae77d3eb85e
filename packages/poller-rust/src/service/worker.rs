//! Background worker that owns a [`Session`] and drives its ticks.
//!
//! Provides a generic `BackgroundWorker<R>` that processes tasks from an mpsc channel
//! via a `BackgroundRunnable` implementation, with periodic tick callbacks, and
//! [`PollWorker`], the typed handle used to control a session running on it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docwatch_core::{Direction, IndexSpec};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::error::WatchError;
use crate::service::pause::PauseSwitch;
use crate::service::phase::PhaseTracker;
use crate::service::session::Session;
use crate::service::view::ViewSlot;
use crate::storage::DataStore;

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Trait for task handlers executed by `BackgroundWorker`.
///
/// Implementors define how individual tasks are processed, what happens on each
/// periodic tick, and how to clean up on shutdown.
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    /// The type of task this runnable processes.
    type Task: Send + 'static;

    /// Process a single task.
    async fn run(&mut self, task: Self::Task);

    /// Called periodically (on each tick interval). Default is a no-op.
    async fn on_tick(&mut self) {}

    /// Called once when the worker is shutting down. Default is a no-op.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// SessionCommand
// ---------------------------------------------------------------------------

/// Reply channel of a [`SessionCommand`].
pub type Reply<T> = oneshot::Sender<Result<T, WatchError>>;

/// Commands applied to a session between ticks.
pub enum SessionCommand {
    Connect {
        host: String,
        store: Arc<dyn DataStore>,
        reply: Reply<()>,
    },
    Disconnect {
        reply: Reply<()>,
    },
    SelectDatabase {
        name: String,
        reply: Reply<()>,
    },
    OpenTab {
        collection: String,
        reply: Reply<()>,
    },
    CloseTab {
        collection: String,
        reply: Reply<()>,
    },
    SwitchTab {
        collection: String,
        reply: Reply<()>,
    },
    MoveToSide {
        collection: String,
        reply: Reply<()>,
    },
    CloseSide {
        reply: Reply<()>,
    },
    AddBottom {
        collection: String,
        reply: Reply<ViewSlot>,
    },
    CloseBottom {
        collection: String,
        reply: Reply<()>,
    },
    SetFilter {
        slot: ViewSlot,
        collection: String,
        text: String,
        reply: Reply<()>,
    },
    SetSort {
        slot: ViewSlot,
        collection: String,
        field: String,
        direction: Direction,
        reply: Reply<()>,
    },
    SetFieldVisible {
        slot: ViewSlot,
        collection: String,
        field: String,
        visible: bool,
        reply: Reply<bool>,
    },
    SetAllFieldsVisible {
        slot: ViewSlot,
        collection: String,
        visible: bool,
        reply: Reply<Vec<String>>,
    },
    ClearCollection {
        collection: String,
        reply: Reply<bool>,
    },
    ListIndexes {
        collection: String,
        reply: Reply<Vec<(String, IndexSpec)>>,
    },
    CreateIndex {
        collection: String,
        text: String,
        reply: Reply<Option<String>>,
    },
    DropIndex {
        collection: String,
        name: String,
        reply: Reply<bool>,
    },
    /// Runs one tick immediately.
    PollNow {
        reply: Reply<()>,
    },
}

#[async_trait]
impl BackgroundRunnable for Session {
    type Task = SessionCommand;

    // A dropped reply receiver only means the caller stopped waiting.
    async fn run(&mut self, task: SessionCommand) {
        match task {
            SessionCommand::Connect { host, store, reply } => {
                let _ = reply.send(self.connect(host, store).await);
            }
            SessionCommand::Disconnect { reply } => {
                self.disconnect();
                let _ = reply.send(Ok(()));
            }
            SessionCommand::SelectDatabase { name, reply } => {
                let _ = reply.send(self.select_database(&name).await);
            }
            SessionCommand::OpenTab { collection, reply } => {
                let _ = reply.send(self.open_tab(&collection));
            }
            SessionCommand::CloseTab { collection, reply } => {
                let _ = reply.send(self.close_tab(&collection));
            }
            SessionCommand::SwitchTab { collection, reply } => {
                let _ = reply.send(self.switch_tab(&collection));
            }
            SessionCommand::MoveToSide { collection, reply } => {
                let _ = reply.send(self.move_to_side(&collection));
            }
            SessionCommand::CloseSide { reply } => {
                let _ = reply.send(self.close_side());
            }
            SessionCommand::AddBottom { collection, reply } => {
                let _ = reply.send(self.add_bottom(&collection));
            }
            SessionCommand::CloseBottom { collection, reply } => {
                let _ = reply.send(self.close_bottom(&collection));
            }
            SessionCommand::SetFilter {
                slot,
                collection,
                text,
                reply,
            } => {
                let _ = reply.send(self.set_filter(slot, &collection, &text));
            }
            SessionCommand::SetSort {
                slot,
                collection,
                field,
                direction,
                reply,
            } => {
                let _ = reply.send(self.set_sort(slot, &collection, &field, direction));
            }
            SessionCommand::SetFieldVisible {
                slot,
                collection,
                field,
                visible,
                reply,
            } => {
                let _ = reply.send(self.set_field_visible(slot, &collection, &field, visible));
            }
            SessionCommand::SetAllFieldsVisible {
                slot,
                collection,
                visible,
                reply,
            } => {
                let _ = reply.send(self.set_all_fields_visible(slot, &collection, visible));
            }
            SessionCommand::ClearCollection { collection, reply } => {
                let _ = reply.send(self.clear_collection(&collection).await);
            }
            SessionCommand::ListIndexes { collection, reply } => {
                let _ = reply.send(self.list_indexes(&collection).await);
            }
            SessionCommand::CreateIndex {
                collection,
                text,
                reply,
            } => {
                let _ = reply.send(self.create_index(&collection, &text).await);
            }
            SessionCommand::DropIndex {
                collection,
                name,
                reply,
            } => {
                let _ = reply.send(self.drop_index(&collection, &name).await);
            }
            SessionCommand::PollNow { reply } => {
                self.tick().await;
                let _ = reply.send(Ok(()));
            }
        }
    }

    async fn on_tick(&mut self) {
        self.tick().await;
    }

    async fn shutdown(&mut self) {
        self.disconnect();
        debug!("poll worker stopped");
    }
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Generic background worker that processes tasks via an mpsc channel.
///
/// The worker spawns a tokio task that:
/// 1. Listens for tasks on the mpsc channel
/// 2. Calls `BackgroundRunnable::run()` for each task
/// 3. Periodically calls `BackgroundRunnable::on_tick()` at the configured interval
/// 4. Calls `BackgroundRunnable::shutdown()` when stopped
///
/// Tasks and ticks run one at a time on the same task, so a tick never starts
/// while the previous one is still running. Ticks missed meanwhile are skipped.
pub struct BackgroundWorker<R: BackgroundRunnable> {
    tx: Option<mpsc::Sender<R::Task>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Start the background worker with the given runnable and tick interval.
    ///
    /// Returns a `BackgroundWorker` handle that can be used to submit tasks
    /// and stop the worker. The channel capacity is fixed at 256.
    pub fn start(mut runnable: R, tick_interval: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<R::Task>(256);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut tick_interval = tokio::time::interval(tick_interval);
            tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // Skip the first immediate tick so on_tick doesn't fire at startup.
            tick_interval.tick().await;

            loop {
                tokio::select! {
                    task = rx.recv() => {
                        match task {
                            Some(t) => runnable.run(t).await,
                            None => break, // Channel closed.
                        }
                    }
                    _ = tick_interval.tick() => {
                        runnable.on_tick().await;
                    }
                    _ = &mut shutdown_rx => {
                        break;
                    }
                }
            }

            runnable.shutdown().await;
        });

        Self {
            tx: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Submit a task to the worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has been stopped or the channel is closed.
    pub async fn submit(&self, task: R::Task) -> anyhow::Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(task)
                .await
                .map_err(|_| anyhow::anyhow!("worker channel closed")),
            None => Err(anyhow::anyhow!("worker not running")),
        }
    }

    /// Stop the worker gracefully, waiting for the worker task to complete.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

// ---------------------------------------------------------------------------
// PollWorker
// ---------------------------------------------------------------------------

/// Handle to a [`Session`] running on a background task.
///
/// Every method submits a command and waits for the session's reply. The
/// pause switch and phase tracker are shared with the session and can be used
/// directly without a round trip.
pub struct PollWorker {
    worker: BackgroundWorker<Session>,
    pause: PauseSwitch,
    phase: PhaseTracker,
}

impl PollWorker {
    /// Spawns `session`, ticking at its configured poll interval.
    #[must_use]
    pub fn start(session: Session) -> Self {
        let pause = session.pause().clone();
        let phase = session.phase().clone();
        let interval = session.config().poll_interval();
        Self {
            worker: BackgroundWorker::start(session, interval),
            pause,
            phase,
        }
    }

    #[must_use]
    pub fn pause(&self) -> &PauseSwitch {
        &self.pause
    }

    #[must_use]
    pub fn phase(&self) -> &PhaseTracker {
        &self.phase
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> Result<T, WatchError> {
        let (reply, rx) = oneshot::channel();
        self.worker
            .submit(build(reply))
            .await
            .map_err(|_| WatchError::WorkerStopped)?;
        rx.await.map_err(|_| WatchError::WorkerStopped)?
    }

    /// # Errors
    ///
    /// See [`Session::connect`].
    pub async fn connect(
        &self,
        host: impl Into<String>,
        store: Arc<dyn DataStore>,
    ) -> Result<(), WatchError> {
        let host = host.into();
        self.request(|reply| SessionCommand::Connect { host, store, reply })
            .await
    }

    /// # Errors
    ///
    /// `WorkerStopped`.
    pub async fn disconnect(&self) -> Result<(), WatchError> {
        self.request(|reply| SessionCommand::Disconnect { reply }).await
    }

    /// # Errors
    ///
    /// See [`Session::select_database`].
    pub async fn select_database(&self, name: &str) -> Result<(), WatchError> {
        let name = name.to_string();
        self.request(|reply| SessionCommand::SelectDatabase { name, reply })
            .await
    }

    /// # Errors
    ///
    /// See [`Session::open_tab`].
    pub async fn open_tab(&self, collection: &str) -> Result<(), WatchError> {
        let collection = collection.to_string();
        self.request(|reply| SessionCommand::OpenTab { collection, reply })
            .await
    }

    /// # Errors
    ///
    /// See [`Session::close_tab`].
    pub async fn close_tab(&self, collection: &str) -> Result<(), WatchError> {
        let collection = collection.to_string();
        self.request(|reply| SessionCommand::CloseTab { collection, reply })
            .await
    }

    /// # Errors
    ///
    /// See [`Session::switch_tab`].
    pub async fn switch_tab(&self, collection: &str) -> Result<(), WatchError> {
        let collection = collection.to_string();
        self.request(|reply| SessionCommand::SwitchTab { collection, reply })
            .await
    }

    /// # Errors
    ///
    /// See [`Session::move_to_side`].
    pub async fn move_to_side(&self, collection: &str) -> Result<(), WatchError> {
        let collection = collection.to_string();
        self.request(|reply| SessionCommand::MoveToSide { collection, reply })
            .await
    }

    /// # Errors
    ///
    /// See [`Session::close_side`].
    pub async fn close_side(&self) -> Result<(), WatchError> {
        self.request(|reply| SessionCommand::CloseSide { reply }).await
    }

    /// # Errors
    ///
    /// See [`Session::add_bottom`].
    pub async fn add_bottom(&self, collection: &str) -> Result<ViewSlot, WatchError> {
        let collection = collection.to_string();
        self.request(|reply| SessionCommand::AddBottom { collection, reply })
            .await
    }

    /// # Errors
    ///
    /// See [`Session::close_bottom`].
    pub async fn close_bottom(&self, collection: &str) -> Result<(), WatchError> {
        let collection = collection.to_string();
        self.request(|reply| SessionCommand::CloseBottom { collection, reply })
            .await
    }

    /// # Errors
    ///
    /// See [`Session::set_filter`].
    pub async fn set_filter(
        &self,
        slot: ViewSlot,
        collection: &str,
        text: &str,
    ) -> Result<(), WatchError> {
        let (collection, text) = (collection.to_string(), text.to_string());
        self.request(|reply| SessionCommand::SetFilter {
            slot,
            collection,
            text,
            reply,
        })
        .await
    }

    /// # Errors
    ///
    /// See [`Session::set_sort`].
    pub async fn set_sort(
        &self,
        slot: ViewSlot,
        collection: &str,
        field: &str,
        direction: Direction,
    ) -> Result<(), WatchError> {
        let (collection, field) = (collection.to_string(), field.to_string());
        self.request(|reply| SessionCommand::SetSort {
            slot,
            collection,
            field,
            direction,
            reply,
        })
        .await
    }

    /// # Errors
    ///
    /// See [`Session::set_field_visible`].
    pub async fn set_field_visible(
        &self,
        slot: ViewSlot,
        collection: &str,
        field: &str,
        visible: bool,
    ) -> Result<bool, WatchError> {
        let (collection, field) = (collection.to_string(), field.to_string());
        self.request(|reply| SessionCommand::SetFieldVisible {
            slot,
            collection,
            field,
            visible,
            reply,
        })
        .await
    }

    /// # Errors
    ///
    /// See [`Session::set_all_fields_visible`].
    pub async fn set_all_fields_visible(
        &self,
        slot: ViewSlot,
        collection: &str,
        visible: bool,
    ) -> Result<Vec<String>, WatchError> {
        let collection = collection.to_string();
        self.request(|reply| SessionCommand::SetAllFieldsVisible {
            slot,
            collection,
            visible,
            reply,
        })
        .await
    }

    /// # Errors
    ///
    /// See [`Session::clear_collection`].
    pub async fn clear_collection(&self, collection: &str) -> Result<bool, WatchError> {
        let collection = collection.to_string();
        self.request(|reply| SessionCommand::ClearCollection { collection, reply })
            .await
    }

    /// # Errors
    ///
    /// See [`Session::list_indexes`].
    pub async fn list_indexes(&self, collection: &str) -> Result<Vec<(String, IndexSpec)>, WatchError> {
        let collection = collection.to_string();
        self.request(|reply| SessionCommand::ListIndexes { collection, reply })
            .await
    }

    /// # Errors
    ///
    /// See [`Session::create_index`].
    pub async fn create_index(&self, collection: &str, text: &str) -> Result<Option<String>, WatchError> {
        let (collection, text) = (collection.to_string(), text.to_string());
        self.request(|reply| SessionCommand::CreateIndex {
            collection,
            text,
            reply,
        })
        .await
    }

    /// # Errors
    ///
    /// See [`Session::drop_index`].
    pub async fn drop_index(&self, collection: &str, name: &str) -> Result<bool, WatchError> {
        let (collection, name) = (collection.to_string(), name.to_string());
        self.request(|reply| SessionCommand::DropIndex {
            collection,
            name,
            reply,
        })
        .await
    }

    /// Runs one tick now, without waiting for the interval.
    ///
    /// # Errors
    ///
    /// `WorkerStopped`.
    pub async fn poll_now(&self) -> Result<(), WatchError> {
        self.request(|reply| SessionCommand::PollNow { reply }).await
    }

    /// Stops the worker and waits for the session to shut down.
    pub async fn stop(&mut self) {
        self.worker.stop().await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use docwatch_core::{Document, Namespace, Value};

    use super::*;
    use crate::service::config::WatchConfig;
    use crate::service::session::SessionDeps;
    use crate::service::sink::{ChannelSink, SinkEvent};
    use crate::storage::{JsonViewState, MemoryDataStore};
    use crate::traits::FixedConfirmer;

    struct CountingRunnable {
        run_count: Arc<AtomicU32>,
        tick_count: Arc<AtomicU32>,
        shutdown_called: Arc<AtomicU32>,
    }

    impl CountingRunnable {
        fn new() -> Self {
            Self {
                run_count: Arc::new(AtomicU32::new(0)),
                tick_count: Arc::new(AtomicU32::new(0)),
                shutdown_called: Arc::new(AtomicU32::new(0)),
            }
        }
    }

    #[async_trait]
    impl BackgroundRunnable for CountingRunnable {
        type Task = String;

        async fn run(&mut self, _task: String) {
            self.run_count.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_tick(&mut self) {
            self.tick_count.fetch_add(1, Ordering::SeqCst);
        }

        async fn shutdown(&mut self) {
            self.shutdown_called.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn start_submit_and_stop() {
        let runnable = CountingRunnable::new();
        let run_count = runnable.run_count.clone();
        let shutdown_called = runnable.shutdown_called.clone();

        let mut worker = BackgroundWorker::start(runnable, Duration::from_secs(60));

        worker.submit("task-1".to_string()).await.unwrap();
        worker.submit("task-2".to_string()).await.unwrap();
        worker.submit("task-3".to_string()).await.unwrap();

        // Give the worker time to process tasks.
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(run_count.load(Ordering::SeqCst), 3);

        worker.stop().await;

        assert_eq!(shutdown_called.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn tick_fires_periodically() {
        let runnable = CountingRunnable::new();
        let tick_count = runnable.tick_count.clone();

        let mut worker = BackgroundWorker::start(runnable, Duration::from_millis(20));

        tokio::time::sleep(Duration::from_millis(100)).await;

        worker.stop().await;

        // Should have at least 2 ticks in 100ms with 20ms interval.
        assert!(tick_count.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn submit_after_stop_returns_error() {
        let mut worker = BackgroundWorker::start(CountingRunnable::new(), Duration::from_secs(60));
        worker.stop().await;

        let result = worker.submit("late-task".to_string()).await;
        assert!(result.is_err());
    }

    fn session(poll_interval_ms: u64) -> (Session, mpsc::Receiver<SinkEvent>) {
        let (sink, events) = ChannelSink::channel(64);
        let deps = SessionDeps {
            state: Arc::new(JsonViewState::in_memory(10)),
            sink: Arc::new(sink),
            confirmer: Arc::new(FixedConfirmer(true)),
            pause: PauseSwitch::new(),
            phase: PhaseTracker::new(),
        };
        let config = WatchConfig {
            poll_interval_ms,
            timestamp_offset_secs: Some(0),
            ..WatchConfig::default()
        };
        (Session::new(config, deps), events)
    }

    fn store_with_user() -> Arc<MemoryDataStore> {
        let store = Arc::new(MemoryDataStore::new());
        let mut doc = Document::new();
        doc.insert("_id".to_string(), Value::Int(1));
        store.insert(&Namespace::new("app", "users"), doc);
        store
    }

    async fn next_view(events: &mut mpsc::Receiver<SinkEvent>) -> crate::service::sink::ViewUpdate {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("no event within 5s")
                .expect("sink closed");
            if let SinkEvent::View(update) = event {
                return update;
            }
        }
    }

    #[tokio::test]
    async fn commands_drive_the_session() {
        let (session, mut events) = session(60_000);
        let mut worker = PollWorker::start(session);
        let store = store_with_user();

        worker.connect("mem", store.clone()).await.unwrap();
        worker.open_tab("users").await.unwrap();
        worker.poll_now().await.unwrap();

        let update = next_view(&mut events).await;
        assert_eq!(update.collection, "users");
        assert_eq!(update.changes.created.len(), 1);

        assert_eq!(worker.add_bottom("users").await.unwrap(), ViewSlot::Bottom(0));
        let name = worker.create_index("users", "('a', 1)").await.unwrap();
        assert_eq!(name.as_deref(), Some("a_1"));
        assert_eq!(worker.list_indexes("users").await.unwrap().len(), 1);
        assert!(worker.clear_collection("users").await.unwrap());

        let err = worker.switch_tab("missing").await.unwrap_err();
        assert!(matches!(err, WatchError::UnknownView { .. }));

        worker.stop().await;
        assert!(matches!(
            worker.poll_now().await,
            Err(WatchError::WorkerStopped)
        ));
    }

    #[tokio::test]
    async fn interval_ticks_poll_open_views() {
        let (session, mut events) = session(10);
        let mut worker = PollWorker::start(session);
        let store = store_with_user();

        worker.connect("mem", store.clone()).await.unwrap();
        worker.open_tab("users").await.unwrap();
        assert_eq!(next_view(&mut events).await.changes.created.len(), 1);

        let mut doc = Document::new();
        doc.insert("_id".to_string(), Value::Int(2));
        store.insert(&Namespace::new("app", "users"), doc);
        let update = next_view(&mut events).await;
        assert_eq!(update.changes.created.len(), 1);
        assert_eq!(update.changes.unchanged.len(), 1);

        worker.stop().await;
    }
}
