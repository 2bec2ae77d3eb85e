//! `DataStore` implementations.
//!
//! Provides concrete backends for the [`DataStore`](super::DataStore) trait:
//! [`MemoryDataStore`] for in-process collections, [`JsonDirStore`] for a
//! directory of JSON files, and [`NullDataStore`] as an always-empty stand-in.

mod json_dir;
mod memory;
mod null;

pub use json_dir::JsonDirStore;
pub use memory::MemoryDataStore;
pub use null::NullDataStore;
