//! Storage collaborators for the poller.
//!
//! - [`DataStore`]: the document database being watched, with bundled
//!   [`MemoryDataStore`], [`JsonDirStore`] and [`NullDataStore`] backends
//! - [`ViewStateStore`]: persisted per-view preferences, with the
//!   [`JsonViewState`] implementation

pub mod data_store;
pub mod datastores;
pub mod view_state;

pub use data_store::*;
pub use datastores::{JsonDirStore, MemoryDataStore, NullDataStore};
pub use view_state::*;
