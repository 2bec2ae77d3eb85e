//! [`UpdateSink`] implementations.

use std::sync::Arc;

use docwatch_core::ChangeSet;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::error::WatchError;
use crate::service::view::ViewSlot;
use crate::traits::UpdateSink;

/// What one view hands to presentation after a poll.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewUpdate {
    /// Where the view is displayed.
    pub slot: ViewSlot,
    /// Collection the view watches.
    pub collection: String,
    /// Classified diff against the previous poll.
    pub changes: ChangeSet,
    /// Fields registered by this poll, in registration order.
    pub new_fields: Vec<String>,
    /// Status suffix, e.g. ` - Filtering - limited(50/120)`.
    pub hints: String,
}

/// Owned event forwarded by [`ChannelSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    /// A view update.
    View(ViewUpdate),
    /// The database listing changed.
    Databases(Vec<String>),
    /// Collections appeared or vanished.
    Collections {
        database: String,
        added: Vec<String>,
        removed: Vec<String>,
    },
    /// A poll or existence check failed.
    Failed { scope: String, message: String },
}

/// Forwards events to a tokio mpsc channel.
///
/// Uses `try_send`: when the receiver lags and the channel is full the event
/// is dropped with a warning rather than stalling the poll task.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<SinkEvent>,
}

impl ChannelSink {
    /// Creates a sink and the receiver for its events.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SinkEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    fn forward(&self, event: SinkEvent) {
        if let Err(err) = self.tx.try_send(event) {
            warn!(error = %err, "dropping sink event");
        }
    }
}

impl UpdateSink for ChannelSink {
    fn on_view_update(&self, update: &ViewUpdate) {
        self.forward(SinkEvent::View(update.clone()));
    }

    fn on_databases(&self, databases: &[String]) {
        self.forward(SinkEvent::Databases(databases.to_vec()));
    }

    fn on_collections(&self, database: &str, added: &[String], removed: &[String]) {
        self.forward(SinkEvent::Collections {
            database: database.to_string(),
            added: added.to_vec(),
            removed: removed.to_vec(),
        });
    }

    fn on_poll_failed(&self, scope: &str, error: &WatchError) {
        self.forward(SinkEvent::Failed {
            scope: scope.to_string(),
            message: error.to_string(),
        });
    }
}

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl UpdateSink for LogSink {
    fn on_view_update(&self, update: &ViewUpdate) {
        info!(
            slot = %update.slot,
            collection = %update.collection,
            created = update.changes.created.len(),
            modified = update.changes.modified.len(),
            unchanged = update.changes.unchanged.len(),
            deleted = update.changes.deleted.len(),
            new_fields = ?update.new_fields,
            hints = %update.hints,
            "view updated"
        );
    }

    fn on_databases(&self, databases: &[String]) {
        info!(?databases, "databases changed");
    }

    fn on_collections(&self, database: &str, added: &[String], removed: &[String]) {
        info!(database, ?added, ?removed, "collections changed");
    }

    fn on_poll_failed(&self, scope: &str, error: &WatchError) {
        error!(scope, error = %error, "poll failed");
    }
}

/// Fans every event out to several sinks in registration order.
#[derive(Default)]
pub struct CompositeSink {
    sinks: Vec<Arc<dyn UpdateSink>>,
}

impl CompositeSink {
    /// Creates a composite over `sinks`.
    #[must_use]
    pub fn new(sinks: Vec<Arc<dyn UpdateSink>>) -> Self {
        Self { sinks }
    }

    /// Adds a sink after construction.
    pub fn add(&mut self, sink: Arc<dyn UpdateSink>) {
        self.sinks.push(sink);
    }
}

impl UpdateSink for CompositeSink {
    fn on_view_update(&self, update: &ViewUpdate) {
        for sink in &self.sinks {
            sink.on_view_update(update);
        }
    }

    fn on_databases(&self, databases: &[String]) {
        for sink in &self.sinks {
            sink.on_databases(databases);
        }
    }

    fn on_collections(&self, database: &str, added: &[String], removed: &[String]) {
        for sink in &self.sinks {
            sink.on_collections(database, added, removed);
        }
    }

    fn on_poll_failed(&self, scope: &str, error: &WatchError) {
        for sink in &self.sinks {
            sink.on_poll_failed(scope, error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(collection: &str) -> ViewUpdate {
        ViewUpdate {
            slot: ViewSlot::Tab,
            collection: collection.to_string(),
            changes: ChangeSet::default(),
            new_fields: vec!["_id".to_string()],
            hints: " - total(0)".to_string(),
        }
    }

    #[tokio::test]
    async fn channel_sink_forwards_events() {
        let (sink, mut rx) = ChannelSink::channel(8);
        sink.on_view_update(&update("users"));
        sink.on_databases(&["app".to_string()]);
        sink.on_collections("app", &["jobs".to_string()], &[]);
        sink.on_poll_failed("users", &WatchError::Timeout { timeout_ms: 10 });

        assert_eq!(rx.recv().await, Some(SinkEvent::View(update("users"))));
        assert_eq!(
            rx.recv().await,
            Some(SinkEvent::Databases(vec!["app".to_string()]))
        );
        assert!(matches!(
            rx.recv().await,
            Some(SinkEvent::Collections { ref added, .. }) if added == &["jobs".to_string()]
        ));
        match rx.recv().await {
            Some(SinkEvent::Failed { scope, message }) => {
                assert_eq!(scope, "users");
                assert!(message.contains("10ms"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let (sink, mut rx) = ChannelSink::channel(1);
        sink.on_view_update(&update("a"));
        sink.on_view_update(&update("b"));
        assert_eq!(rx.recv().await, Some(SinkEvent::View(update("a"))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn composite_fans_out() {
        let (first, mut rx1) = ChannelSink::channel(4);
        let (second, mut rx2) = ChannelSink::channel(4);
        let mut composite = CompositeSink::new(vec![Arc::new(first)]);
        composite.add(Arc::new(second));
        composite.add(Arc::new(LogSink));

        composite.on_view_update(&update("users"));
        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }
}
