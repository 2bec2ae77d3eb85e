//! Data-store collaborator trait.
//!
//! Defines [`DataStore`], the read/maintenance surface the poller needs from a
//! document database: listing, counting, filtered/sorted/limited fetches,
//! collection clearing, and index management.

use async_trait::async_trait;
use docwatch_core::{compare_by, Criteria, Document, FindOptions, IndexSpec, Namespace};

/// Document database consumed by the poller.
///
/// Collections that do not exist behave as empty. Used as `Arc<dyn DataStore>`.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Names of all databases, sorted.
    async fn list_databases(&self) -> anyhow::Result<Vec<String>>;

    /// Names of all collections in `database`, sorted.
    async fn list_collections(&self, database: &str) -> anyhow::Result<Vec<String>>;

    /// Number of documents in `ns` matching `criteria`.
    async fn count(&self, ns: &Namespace, criteria: &Criteria) -> anyhow::Result<usize>;

    /// Fetches documents matching `options.criteria`, sorted, limited and
    /// projected as requested. Without sort keys the store's natural order
    /// is kept.
    async fn find(&self, ns: &Namespace, options: &FindOptions) -> anyhow::Result<Vec<Document>>;

    /// Removes every document from `ns`. Returns how many were removed.
    async fn remove(&self, ns: &Namespace) -> anyhow::Result<usize>;

    /// All indexes on `ns` as `(name, spec)` pairs, including `_id_`.
    async fn list_indexes(&self, ns: &Namespace) -> anyhow::Result<Vec<(String, IndexSpec)>>;

    /// Creates an index and returns its name. Creating an existing index is a no-op.
    async fn create_index(&self, ns: &Namespace, spec: &IndexSpec) -> anyhow::Result<String>;

    /// Drops the named index.
    ///
    /// # Errors
    ///
    /// Fails for `_id_` and for names that do not exist.
    async fn drop_index(&self, ns: &Namespace, name: &str) -> anyhow::Result<()>;

    /// Whether this store is a no-op placeholder.
    fn is_null(&self) -> bool {
        false
    }
}

/// Runs `options` over an in-process document sequence.
///
/// Shared by the bundled stores: filter, stable sort, limit, then project.
#[must_use]
pub fn evaluate_find<I>(documents: I, options: &FindOptions) -> Vec<Document>
where
    I: IntoIterator<Item = Document>,
{
    let mut matched: Vec<Document> = documents
        .into_iter()
        .filter(|doc| options.criteria.matches(doc))
        .collect();
    if !options.sort.is_empty() {
        matched.sort_by(|a, b| compare_by(a, b, &options.sort));
    }
    if let Some(limit) = options.limit {
        matched.truncate(limit);
    }
    match &options.projection {
        Some(projection) => matched.into_iter().map(|doc| projection.apply(doc)).collect(),
        None => matched,
    }
}

/// Sorts names the way listings are returned.
pub(crate) fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names.dedup();
    names
}
