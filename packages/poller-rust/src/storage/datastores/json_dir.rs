//! File-backed [`DataStore`] over a directory tree of JSON files.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<database>/<collection>.json          array of extended-JSON documents
//! <root>/<database>/<collection>.indexes.json  { "<name>": IndexSpec, ... }
//! ```
//!
//! Every call re-reads the files, so edits made by other processes show up
//! on the next poll.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use docwatch_core::{
    document_from_json, document_to_json, Criteria, Document, FindOptions, IndexSpec, Namespace,
    ID_INDEX_NAME,
};
use indexmap::IndexMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::storage::data_store::{evaluate_find, sorted, DataStore};
use crate::storage::datastores::memory::id_index;

const DOCUMENTS_SUFFIX: &str = ".json";
const INDEXES_SUFFIX: &str = ".indexes.json";

/// Directory-of-JSON-files document store.
pub struct JsonDirStore {
    root: PathBuf,
    /// Serializes read-modify-write cycles issued through this handle.
    write_lock: Mutex<()>,
}

impl JsonDirStore {
    /// Opens a store rooted at `root`. The directory need not exist yet.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Overwrites a collection's documents, creating directories as needed.
    ///
    /// # Errors
    ///
    /// Fails on invalid names or I/O errors.
    pub async fn write_collection(&self, ns: &Namespace, documents: &[Document]) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write_documents(ns, documents).await
    }

    fn database_dir(&self, database: &str) -> anyhow::Result<PathBuf> {
        check_name(database)?;
        Ok(self.root.join(database))
    }

    fn documents_path(&self, ns: &Namespace) -> anyhow::Result<PathBuf> {
        check_name(&ns.collection)?;
        Ok(self
            .database_dir(&ns.database)?
            .join(format!("{}{DOCUMENTS_SUFFIX}", ns.collection)))
    }

    fn indexes_path(&self, ns: &Namespace) -> anyhow::Result<PathBuf> {
        check_name(&ns.collection)?;
        Ok(self
            .database_dir(&ns.database)?
            .join(format!("{}{INDEXES_SUFFIX}", ns.collection)))
    }

    async fn read_documents(&self, ns: &Namespace) -> anyhow::Result<Vec<Document>> {
        let path = self.documents_path(ns)?;
        let Some(bytes) = read_optional(&path).await? else {
            return Ok(Vec::new());
        };
        let json: Vec<serde_json::Value> = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing {}", path.display()))?;
        json.into_iter()
            .enumerate()
            .map(|(i, item)| {
                document_from_json(item)
                    .with_context(|| format!("{}: element {i} is not an object", path.display()))
            })
            .collect()
    }

    async fn write_documents(&self, ns: &Namespace, documents: &[Document]) -> anyhow::Result<()> {
        let path = self.documents_path(ns)?;
        let json: Vec<serde_json::Value> = documents.iter().map(document_to_json).collect();
        write_file(&path, &serde_json::to_vec_pretty(&json)?).await
    }

    async fn read_indexes(&self, ns: &Namespace) -> anyhow::Result<IndexMap<String, IndexSpec>> {
        let path = self.indexes_path(ns)?;
        match read_optional(&path).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("parsing {}", path.display())),
            None => Ok(IndexMap::new()),
        }
    }

    async fn write_indexes(
        &self,
        ns: &Namespace,
        indexes: &IndexMap<String, IndexSpec>,
    ) -> anyhow::Result<()> {
        let path = self.indexes_path(ns)?;
        write_file(&path, &serde_json::to_vec_pretty(indexes)?).await
    }
}

#[async_trait]
impl DataStore for JsonDirStore {
    async fn list_databases(&self) -> anyhow::Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e).with_context(|| format!("listing {}", self.root.display())),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        Ok(sorted(names))
    }

    async fn list_collections(&self, database: &str) -> anyhow::Result<Vec<String>> {
        let dir = self.database_dir(database)?;
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e).with_context(|| format!("listing {}", dir.display())),
        };
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if file_name.ends_with(INDEXES_SUFFIX) {
                continue;
            }
            if let Some(collection) = file_name.strip_suffix(DOCUMENTS_SUFFIX) {
                names.push(collection.to_string());
            }
        }
        Ok(sorted(names))
    }

    async fn count(&self, ns: &Namespace, criteria: &Criteria) -> anyhow::Result<usize> {
        let documents = self.read_documents(ns).await?;
        Ok(documents.iter().filter(|d| criteria.matches(d)).count())
    }

    async fn find(&self, ns: &Namespace, options: &FindOptions) -> anyhow::Result<Vec<Document>> {
        Ok(evaluate_find(self.read_documents(ns).await?, options))
    }

    async fn remove(&self, ns: &Namespace) -> anyhow::Result<usize> {
        let _guard = self.write_lock.lock().await;
        let removed = self.read_documents(ns).await?.len();
        if removed > 0 {
            self.write_documents(ns, &[]).await?;
        }
        debug!(namespace = %ns, removed, "cleared collection file");
        Ok(removed)
    }

    async fn list_indexes(&self, ns: &Namespace) -> anyhow::Result<Vec<(String, IndexSpec)>> {
        let mut indexes = vec![(ID_INDEX_NAME.to_string(), id_index())];
        indexes.extend(self.read_indexes(ns).await?);
        Ok(indexes)
    }

    async fn create_index(&self, ns: &Namespace, spec: &IndexSpec) -> anyhow::Result<String> {
        let _guard = self.write_lock.lock().await;
        let name = spec.name();
        let mut indexes = self.read_indexes(ns).await?;
        if !indexes.contains_key(&name) {
            indexes.insert(name.clone(), spec.clone());
            self.write_indexes(ns, &indexes).await?;
        }
        Ok(name)
    }

    async fn drop_index(&self, ns: &Namespace, name: &str) -> anyhow::Result<()> {
        if name == ID_INDEX_NAME {
            anyhow::bail!("cannot drop the {ID_INDEX_NAME} index");
        }
        let _guard = self.write_lock.lock().await;
        let mut indexes = self.read_indexes(ns).await?;
        if indexes.shift_remove(name).is_none() {
            anyhow::bail!("index {name} not found on {ns}");
        }
        self.write_indexes(ns, &indexes).await
    }
}

/// Rejects names that would escape the root or are not single path segments.
fn check_name(name: &str) -> anyhow::Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        anyhow::bail!("invalid database or collection name: {name:?}");
    }
    Ok(())
}

async fn read_optional(path: &Path) -> anyhow::Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))
}
