//! No-op [`DataStore`] implementation.
//!
//! [`NullDataStore`] has no databases and no collections. Every read is empty
//! and every maintenance call succeeds without effect. It stands in for a
//! connection before one is configured.

use async_trait::async_trait;
use docwatch_core::{Criteria, Document, FindOptions, IndexSpec, Namespace};

use crate::storage::data_store::DataStore;

/// Always-empty `DataStore`.
pub struct NullDataStore;

#[async_trait]
impl DataStore for NullDataStore {
    async fn list_databases(&self) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn list_collections(&self, _database: &str) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn count(&self, _ns: &Namespace, _criteria: &Criteria) -> anyhow::Result<usize> {
        Ok(0)
    }

    async fn find(&self, _ns: &Namespace, _options: &FindOptions) -> anyhow::Result<Vec<Document>> {
        Ok(Vec::new())
    }

    async fn remove(&self, _ns: &Namespace) -> anyhow::Result<usize> {
        Ok(0)
    }

    async fn list_indexes(&self, _ns: &Namespace) -> anyhow::Result<Vec<(String, IndexSpec)>> {
        Ok(Vec::new())
    }

    async fn create_index(&self, _ns: &Namespace, spec: &IndexSpec) -> anyhow::Result<String> {
        Ok(spec.name())
    }

    async fn drop_index(&self, _ns: &Namespace, _name: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn is_null(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use docwatch_core::{Direction, SortKey};

    use super::*;

    fn ns() -> Namespace {
        Namespace::new("db", "coll")
    }

    #[tokio::test]
    async fn listings_are_empty() {
        let store = NullDataStore;
        assert!(store.list_databases().await.unwrap().is_empty());
        assert!(store.list_collections("db").await.unwrap().is_empty());
        assert!(store.list_indexes(&ns()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reads_return_nothing() {
        let store = NullDataStore;
        assert_eq!(store.count(&ns(), &Criteria::match_all()).await.unwrap(), 0);
        assert!(store
            .find(&ns(), &FindOptions::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn maintenance_succeeds() {
        let store = NullDataStore;
        assert_eq!(store.remove(&ns()).await.unwrap(), 0);
        let spec = IndexSpec {
            keys: vec![SortKey::new("a", Direction::Ascending)],
        };
        assert_eq!(store.create_index(&ns(), &spec).await.unwrap(), "a_1");
        assert!(store.drop_index(&ns(), "a_1").await.is_ok());
    }

    #[test]
    fn is_null_returns_true() {
        assert!(NullDataStore.is_null());
    }
}
