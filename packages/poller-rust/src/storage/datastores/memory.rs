//! In-memory [`DataStore`] implementation backed by [`DashMap`].
//!
//! Holds every collection in process memory. Used by tests and by embedders
//! that feed documents in directly; mutation helpers mirror what a writer
//! on a real database would do between polls.

use async_trait::async_trait;
use dashmap::DashMap;
use docwatch_core::{
    Criteria, Direction, Document, FindOptions, IndexSpec, Namespace, SortKey, Value, ID_FIELD,
    ID_INDEX_NAME,
};
use indexmap::IndexMap;

use crate::storage::data_store::{evaluate_find, sorted, DataStore};

#[derive(Debug, Default)]
struct Collection {
    documents: Vec<Document>,
    indexes: IndexMap<String, IndexSpec>,
}

/// Concurrent in-memory document store.
#[derive(Debug, Default)]
pub struct MemoryDataStore {
    collections: DashMap<Namespace, Collection>,
}

impl MemoryDataStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty collection if it does not exist yet.
    pub fn create_collection(&self, ns: &Namespace) {
        self.collections.entry(ns.clone()).or_default();
    }

    /// Drops a collection with its documents and indexes.
    pub fn drop_collection(&self, ns: &Namespace) -> bool {
        self.collections.remove(ns).is_some()
    }

    /// Appends a document, creating the collection on first use.
    pub fn insert(&self, ns: &Namespace, document: Document) {
        self.collections
            .entry(ns.clone())
            .or_default()
            .documents
            .push(document);
    }

    /// Replaces the document whose `_id` equals the replacement's, keeping
    /// its position. Returns `false` when no such document exists.
    pub fn replace(&self, ns: &Namespace, document: Document) -> bool {
        let Some(id) = document.get(ID_FIELD).cloned() else {
            return false;
        };
        let Some(mut collection) = self.collections.get_mut(ns) else {
            return false;
        };
        match collection
            .documents
            .iter_mut()
            .find(|d| d.get(ID_FIELD) == Some(&id))
        {
            Some(slot) => {
                *slot = document;
                true
            }
            None => false,
        }
    }

    /// Deletes the document with the given `_id`.
    pub fn delete(&self, ns: &Namespace, id: &Value) -> bool {
        let Some(mut collection) = self.collections.get_mut(ns) else {
            return false;
        };
        let before = collection.documents.len();
        collection.documents.retain(|d| d.get(ID_FIELD) != Some(id));
        collection.documents.len() != before
    }

    fn snapshot(&self, ns: &Namespace) -> Vec<Document> {
        self.collections
            .get(ns)
            .map(|c| c.documents.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DataStore for MemoryDataStore {
    async fn list_databases(&self) -> anyhow::Result<Vec<String>> {
        Ok(sorted(
            self.collections
                .iter()
                .map(|entry| entry.key().database.clone())
                .collect(),
        ))
    }

    async fn list_collections(&self, database: &str) -> anyhow::Result<Vec<String>> {
        Ok(sorted(
            self.collections
                .iter()
                .filter(|entry| entry.key().database == database)
                .map(|entry| entry.key().collection.clone())
                .collect(),
        ))
    }

    async fn count(&self, ns: &Namespace, criteria: &Criteria) -> anyhow::Result<usize> {
        Ok(self.collections.get(ns).map_or(0, |c| {
            c.documents.iter().filter(|d| criteria.matches(d)).count()
        }))
    }

    async fn find(&self, ns: &Namespace, options: &FindOptions) -> anyhow::Result<Vec<Document>> {
        Ok(evaluate_find(self.snapshot(ns), options))
    }

    async fn remove(&self, ns: &Namespace) -> anyhow::Result<usize> {
        Ok(self
            .collections
            .get_mut(ns)
            .map_or(0, |mut c| std::mem::take(&mut c.documents).len()))
    }

    async fn list_indexes(&self, ns: &Namespace) -> anyhow::Result<Vec<(String, IndexSpec)>> {
        let mut indexes = vec![(ID_INDEX_NAME.to_string(), id_index())];
        if let Some(collection) = self.collections.get(ns) {
            indexes.extend(
                collection
                    .indexes
                    .iter()
                    .map(|(name, spec)| (name.clone(), spec.clone())),
            );
        }
        Ok(indexes)
    }

    async fn create_index(&self, ns: &Namespace, spec: &IndexSpec) -> anyhow::Result<String> {
        let name = spec.name();
        self.collections
            .entry(ns.clone())
            .or_default()
            .indexes
            .entry(name.clone())
            .or_insert_with(|| spec.clone());
        Ok(name)
    }

    async fn drop_index(&self, ns: &Namespace, name: &str) -> anyhow::Result<()> {
        if name == ID_INDEX_NAME {
            anyhow::bail!("cannot drop the {ID_INDEX_NAME} index");
        }
        let removed = self
            .collections
            .get_mut(ns)
            .and_then(|mut c| c.indexes.shift_remove(name));
        match removed {
            Some(_) => Ok(()),
            None => anyhow::bail!("index {name} not found on {ns}"),
        }
    }
}

/// Spec of the implicit identifier index.
pub(crate) fn id_index() -> IndexSpec {
    IndexSpec {
        keys: vec![SortKey::new(ID_FIELD, Direction::Ascending)],
    }
}
