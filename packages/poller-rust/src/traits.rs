use crate::error::WatchError;
use crate::service::sink::ViewUpdate;

/// Receiver of everything the poller wants presented.
///
/// Implementations: channel forwarding, tracing output, fan-out.
/// Used as `Arc<dyn UpdateSink>`. Calls are made from the poll task and must
/// not block.
pub trait UpdateSink: Send + Sync {
    /// A view produced a non-empty change-set or registered new fields.
    fn on_view_update(&self, update: &ViewUpdate);

    /// The database listing changed. The first entry is the preferred one.
    fn on_databases(&self, _databases: &[String]) {}

    /// Collections appeared in or vanished from the selected database.
    fn on_collections(&self, _database: &str, _added: &[String], _removed: &[String]) {}

    /// A poll cycle or existence check failed. Polling continues.
    fn on_poll_failed(&self, _scope: &str, _error: &WatchError) {}
}

/// Asks for explicit approval before a destructive operation.
pub trait Confirmer: Send + Sync {
    /// Returns `true` to proceed with the action described by `prompt`.
    fn confirm(&self, prompt: &str) -> bool;
}

/// Confirmer with a fixed answer.
#[derive(Debug, Clone, Copy)]
pub struct FixedConfirmer(pub bool);

impl Confirmer for FixedConfirmer {
    fn confirm(&self, _prompt: &str) -> bool {
        self.0
    }
}
