use std::fmt;

use serde::{Deserialize, Serialize};

/// A collection within a database, as addressed on the data store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace {
    /// Database name.
    pub database: String,
    /// Collection name.
    pub collection: String,
}

impl Namespace {
    /// Creates a namespace.
    #[must_use]
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Identity of a collection view: which host, database and collection it
/// watches. Persisted view state is keyed by this triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViewKey {
    /// Data-store host the view is connected to.
    pub host: String,
    /// Database name.
    pub database: String,
    /// Collection name.
    pub collection: String,
}

impl ViewKey {
    /// Creates a view key.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        database: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            database: database.into(),
            collection: collection.into(),
        }
    }

    /// The namespace this view reads from.
    #[must_use]
    pub fn namespace(&self) -> Namespace {
        Namespace::new(self.database.clone(), self.collection.clone())
    }
}

/// Renders as `host-database-collection`, the persisted-state group name.
impl fmt::Display for ViewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.host, self.database, self.collection)
    }
}
