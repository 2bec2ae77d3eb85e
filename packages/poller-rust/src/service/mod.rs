//! Poll orchestration.
//!
//! 1. **Views** (`view`): one snapshot/diff cycle per collection view
//! 2. **Session** (`session`): connection, database and collection tracking, view layout
//! 3. **Worker** (`worker`): runs a session on a background task at the poll interval
//! 4. **Sinks** (`sink`), **detail** rendering (`detail`), pause and phase state

pub mod config;
pub mod detail;
pub mod pause;
pub mod phase;
pub mod session;
pub mod sink;
pub mod view;
pub mod worker;

// Re-export key types for convenient access.
pub use config::WatchConfig;
pub use detail::{render_detail, render_documents, Detail, DetailLine};
pub use pause::PauseSwitch;
pub use phase::{PhaseGuard, PhaseTracker, PollPhase};
pub use session::{Session, SessionDeps};
pub use sink::{ChannelSink, CompositeSink, LogSink, SinkEvent, ViewUpdate};
pub use view::{CollectionView, PollContext, ViewSlot};
pub use worker::{BackgroundRunnable, BackgroundWorker, PollWorker, Reply, SessionCommand};
