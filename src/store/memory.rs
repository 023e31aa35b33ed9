//! In-memory [`VectorStore`] implementation for testing.
//!
//! Uses `BTreeMap` behind `std::sync::RwLock`. Vector search is brute-force
//! cosine distance over all stored vectors.

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_distance;
use crate::models::{IndexEntry, RetrievedChunk};

use super::{rank, MetadataFilter, VectorStore};

struct Collection {
    dims: usize,
    entries: BTreeMap<String, IndexEntry>,
}

/// In-memory store bound to one collection name.
pub struct InMemoryStore {
    name: String,
    inner: RwLock<Option<Collection>>,
}

impl InMemoryStore {
    /// A store whose collection does not exist yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(None),
        }
    }

    /// A store with an empty collection of the given dimensionality.
    pub fn with_collection(name: impl Into<String>, dims: usize) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(Some(Collection {
                dims,
                entries: BTreeMap::new(),
            })),
        }
    }

    /// Snapshot of all entries, ordered by id.
    pub fn entries(&self) -> Vec<IndexEntry> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        guard
            .as_ref()
            .map(|c| c.entries.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn collection(&self) -> &str {
        &self.name
    }

    async fn collection_dims(&self) -> Result<Option<usize>> {
        let guard = self.inner.read().map_err(|_| anyhow!("store lock poisoned"))?;
        Ok(guard.as_ref().map(|c| c.dims))
    }

    async fn create_collection(&self, dims: usize) -> Result<()> {
        let mut guard = self.inner.write().map_err(|_| anyhow!("store lock poisoned"))?;
        match guard.as_ref() {
            Some(existing) if existing.dims != dims => bail!(
                "Collection '{}' already exists with {} dims",
                self.name,
                existing.dims
            ),
            Some(_) => {}
            None => {
                *guard = Some(Collection {
                    dims,
                    entries: BTreeMap::new(),
                });
            }
        }
        Ok(())
    }

    async fn drop_collection(&self) -> Result<()> {
        let mut guard = self.inner.write().map_err(|_| anyhow!("store lock poisoned"))?;
        *guard = None;
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let guard = self.inner.read().map_err(|_| anyhow!("store lock poisoned"))?;
        let collection = guard
            .as_ref()
            .ok_or_else(|| anyhow!("Collection '{}' does not exist", self.name))?;
        Ok(collection.entries.len())
    }

    async fn add(&self, entries: &[IndexEntry]) -> Result<()> {
        let mut guard = self.inner.write().map_err(|_| anyhow!("store lock poisoned"))?;
        let collection = guard
            .as_mut()
            .ok_or_else(|| anyhow!("Collection '{}' does not exist", self.name))?;

        for (i, entry) in entries.iter().enumerate() {
            if collection.entries.contains_key(&entry.id)
                || entries[..i].iter().any(|e| e.id == entry.id)
            {
                bail!("Duplicate entry id: {}", entry.id);
            }
            if entry.embedding.len() != collection.dims {
                bail!(
                    "Entry {} has {} dims, collection expects {}",
                    entry.id,
                    entry.embedding.len(),
                    collection.dims
                );
            }
        }

        for entry in entries {
            collection.entries.insert(entry.id.clone(), entry.clone());
        }
        Ok(())
    }

    async fn delete_where(&self, filter: &MetadataFilter) -> Result<usize> {
        let mut guard = self.inner.write().map_err(|_| anyhow!("store lock poisoned"))?;
        let collection = guard
            .as_mut()
            .ok_or_else(|| anyhow!("Collection '{}' does not exist", self.name))?;
        let before = collection.entries.len();
        collection
            .entries
            .retain(|_, entry| !filter.matches(&entry.metadata));
        Ok(before - collection.entries.len())
    }

    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<RetrievedChunk>> {
        let guard = self.inner.read().map_err(|_| anyhow!("store lock poisoned"))?;
        let collection = guard
            .as_ref()
            .ok_or_else(|| anyhow!("Collection '{}' does not exist", self.name))?;

        let hits = collection
            .entries
            .values()
            .map(|entry| RetrievedChunk {
                id: entry.id.clone(),
                text: entry.document.clone(),
                metadata: entry.metadata.clone(),
                distance: cosine_distance(embedding, &entry.embedding),
            })
            .collect();
        Ok(rank(hits, k))
    }
}
