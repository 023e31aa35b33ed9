//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is the only way the reconciler and the
//! retriever touch persisted index entries. A store instance is bound to a
//! single named collection.
//!
//! Backends:
//! - [`sqlite::SqliteStore`]: durable store on SQLite (brute-force cosine search).
//! - [`memory::InMemoryStore`]: `RwLock`-guarded maps for tests.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{EntryMetadata, IndexEntry, RetrievedChunk};

/// Metadata field usable in equality filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataKey {
    Source,
    Filename,
}

/// `metadata.<key> == value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataFilter {
    pub key: MetadataKey,
    pub value: String,
}

impl MetadataFilter {
    pub fn filename(value: impl Into<String>) -> Self {
        Self {
            key: MetadataKey::Filename,
            value: value.into(),
        }
    }

    pub fn source(value: impl Into<String>) -> Self {
        Self {
            key: MetadataKey::Source,
            value: value.into(),
        }
    }

    pub fn matches(&self, metadata: &EntryMetadata) -> bool {
        let field = match self.key {
            MetadataKey::Source => &metadata.source,
            MetadataKey::Filename => &metadata.filename,
        };
        field == &self.value
    }
}

/// Abstract vector store bound to one collection.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`collection_dims`](VectorStore::collection_dims) | `None` if the collection does not exist |
/// | [`create_collection`](VectorStore::create_collection) | Create an empty collection (idempotent) |
/// | [`drop_collection`](VectorStore::drop_collection) | Remove the collection and all entries |
/// | [`count`](VectorStore::count) | Number of entries |
/// | [`add`](VectorStore::add) | Insert entries; duplicate ids are an error |
/// | [`delete_where`](VectorStore::delete_where) | Delete by metadata equality |
/// | [`query`](VectorStore::query) | `k` nearest entries by cosine distance |
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn collection(&self) -> &str;

    async fn collection_dims(&self) -> Result<Option<usize>>;

    async fn create_collection(&self, dims: usize) -> Result<()>;

    async fn drop_collection(&self) -> Result<()>;

    async fn count(&self) -> Result<usize>;

    /// Insert all entries atomically. Fails without inserting anything if
    /// any id already exists or the collection is missing.
    async fn add(&self, entries: &[IndexEntry]) -> Result<()>;

    /// Delete every entry matching `filter`; returns how many were removed.
    async fn delete_where(&self, filter: &MetadataFilter) -> Result<usize>;

    /// Return up to `k` entries ordered by ascending cosine distance.
    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<RetrievedChunk>>;
}

/// Sort by ascending distance, ties broken by id for stable output.
pub(crate) fn rank(mut hits: Vec<RetrievedChunk>, k: usize) -> Vec<RetrievedChunk> {
    hits.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(k);
    hits
}
