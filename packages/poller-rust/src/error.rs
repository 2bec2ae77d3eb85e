/// Errors surfaced by the poller.
///
/// Poll-loop failures are logged and swallowed by the session; these reach
/// callers only through explicit commands (connect, clear, index changes).
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("not connected to a data store")]
    NotConnected,
    #[error("no database selected")]
    NoDatabase,
    #[error("no open view for collection {collection}")]
    UnknownView { collection: String },
    #[error("data-store call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("poll worker is not running")]
    WorkerStopped,
    #[error("configuration error: {0}")]
    Config(String),
    #[error("data-store error: {0}")]
    Store(#[from] anyhow::Error),
}
