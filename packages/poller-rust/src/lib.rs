//! `docwatch` poller: data-store collaborators, persisted view state, and the
//! polling session that turns collection snapshots into change-sets.

pub mod error;
pub mod service;
pub mod storage;
pub mod traits;

pub use error::WatchError;
pub use service::{PollWorker, Session, SessionDeps, ViewSlot, ViewUpdate, WatchConfig};
pub use traits::{Confirmer, FixedConfirmer, UpdateSink};
