//! SQLite-backed [`VectorStore`] implementation.
//!
//! Entries live in one `entries` table keyed by `(collection, id)`; the
//! metadata fields are plain columns so metadata-equality deletes are
//! indexed SQL. Vectors are little-endian `f32` BLOBs and nearest-neighbor
//! search is a brute-force cosine scan over the collection.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use crate::models::{EntryMetadata, IndexEntry, RetrievedChunk};

use super::{rank, MetadataFilter, MetadataKey, VectorStore};

pub struct SqliteStore {
    pool: SqlitePool,
    collection: String,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, collection: impl Into<String>) -> Self {
        Self {
            pool,
            collection: collection.into(),
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn filter_column(key: MetadataKey) -> &'static str {
    match key {
        MetadataKey::Source => "source",
        MetadataKey::Filename => "filename",
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn collection_dims(&self) -> Result<Option<usize>> {
        let dims: Option<i64> = sqlx::query_scalar("SELECT dims FROM collections WHERE name = ?")
            .bind(&self.collection)
            .fetch_optional(&self.pool)
            .await?;
        Ok(dims.map(|d| d as usize))
    }

    async fn create_collection(&self, dims: usize) -> Result<()> {
        if let Some(existing) = self.collection_dims().await? {
            if existing != dims {
                bail!(
                    "Collection '{}' already exists with {} dims",
                    self.collection,
                    existing
                );
            }
            return Ok(());
        }

        sqlx::query("INSERT INTO collections (name, dims, created_at) VALUES (?, ?, ?)")
            .bind(&self.collection)
            .bind(dims as i64)
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn drop_collection(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM entries WHERE collection = ?")
            .bind(&self.collection)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM collections WHERE name = ?")
            .bind(&self.collection)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        if self.collection_dims().await?.is_none() {
            bail!("Collection '{}' does not exist", self.collection);
        }
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entries WHERE collection = ?")
            .bind(&self.collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn add(&self, entries: &[IndexEntry]) -> Result<()> {
        let dims = match self.collection_dims().await? {
            Some(d) => d,
            None => bail!("Collection '{}' does not exist", self.collection),
        };

        let mut tx = self.pool.begin().await?;

        for entry in entries {
            if entry.embedding.len() != dims {
                bail!(
                    "Entry {} has {} dims, collection expects {}",
                    entry.id,
                    entry.embedding.len(),
                    dims
                );
            }

            // Plain INSERT: a duplicate id violates the primary key and
            // rolls back the whole batch.
            sqlx::query(
                r#"
                INSERT INTO entries (collection, id, document, source, filename, title,
                                     chunk_index, total_chunks, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&self.collection)
            .bind(&entry.id)
            .bind(&entry.document)
            .bind(&entry.metadata.source)
            .bind(&entry.metadata.filename)
            .bind(&entry.metadata.title)
            .bind(entry.metadata.chunk_index as i64)
            .bind(entry.metadata.total_chunks as i64)
            .bind(vec_to_blob(&entry.embedding))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_where(&self, filter: &MetadataFilter) -> Result<usize> {
        let sql = format!(
            "DELETE FROM entries WHERE collection = ? AND {} = ?",
            filter_column(filter.key)
        );
        let result = sqlx::query(&sql)
            .bind(&self.collection)
            .bind(&filter.value)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<RetrievedChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT id, document, source, filename, title, chunk_index, total_chunks, embedding
            FROM entries
            WHERE collection = ?
            "#,
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;

        let hits = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let chunk_index: i64 = row.get("chunk_index");
                let total_chunks: i64 = row.get("total_chunks");
                RetrievedChunk {
                    id: row.get("id"),
                    text: row.get("document"),
                    metadata: EntryMetadata {
                        source: row.get("source"),
                        filename: row.get("filename"),
                        title: row.get("title"),
                        chunk_index: chunk_index as usize,
                        total_chunks: total_chunks as usize,
                    },
                    distance: cosine_distance(embedding, &blob_to_vec(&blob)),
                }
            })
            .collect();

        Ok(rank(hits, k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn entry(id: &str, filename: &str, embedding: Vec<f32>) -> IndexEntry {
        IndexEntry {
            id: id.to_string(),
            embedding,
            document: format!("text of {id}"),
            metadata: EntryMetadata {
                source: format!("/kb/{filename}"),
                filename: filename.to_string(),
                title: filename.trim_end_matches(".txt").to_string(),
                chunk_index: 0,
                total_chunks: 1,
            },
        }
    }

    async fn open(dir: &tempfile::TempDir) -> SqliteStore {
        let pool = db::connect(&dir.path().join("index.sqlite")).await.unwrap();
        SqliteStore::new(pool, "kb")
    }

    #[tokio::test]
    async fn test_collection_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        assert_eq!(store.collection_dims().await.unwrap(), None);
        assert!(store.count().await.is_err());

        store.create_collection(3).await.unwrap();
        store.create_collection(3).await.unwrap();
        assert_eq!(store.collection_dims().await.unwrap(), Some(3));
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.create_collection(4).await.is_err());

        store.drop_collection().await.unwrap();
        assert_eq!(store.collection_dims().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_add_query_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        store.create_collection(2).await.unwrap();

        store
            .add(&[
                entry("a", "Yoda.txt", vec![1.0, 0.0]),
                entry("b", "Yoda.txt", vec![0.0, 1.0]),
                entry("c", "Leia.txt", vec![0.6, 0.8]),
            ])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 3);

        let hits = store.query(&[0.0, 1.0], 2).await.unwrap();
        assert_eq!(hits[0].id, "b");
        assert_eq!(hits[0].metadata.filename, "Yoda.txt");
        assert!(hits[0].distance.abs() < 1e-6);
        assert_eq!(hits[1].id, "c");

        let removed = store
            .delete_where(&MetadataFilter::filename("Yoda.txt"))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_by_source() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        store.create_collection(2).await.unwrap();
        store
            .add(&[
                entry("a", "Yoda.txt", vec![1.0, 0.0]),
                entry("b", "Leia.txt", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let removed = store
            .delete_where(&MetadataFilter::source("/kb/Leia.txt"))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        let removed = store
            .delete_where(&MetadataFilter::source("/elsewhere/Yoda.txt"))
            .await
            .unwrap();
        assert_eq!(removed, 0);

        let hits = store.query(&[0.0, 1.0], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
    }

    #[tokio::test]
    async fn test_duplicate_id_rolls_back_batch() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        store.create_collection(2).await.unwrap();
        store
            .add(&[entry("a", "Yoda.txt", vec![1.0, 0.0])])
            .await
            .unwrap();

        let result = store
            .add(&[
                entry("fresh", "Leia.txt", vec![1.0, 0.0]),
                entry("a", "Leia.txt", vec![1.0, 0.0]),
            ])
            .await;
        assert!(result.is_err());
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::connect(&dir.path().join("index.sqlite")).await.unwrap();
        let first = SqliteStore::new(pool.clone(), "first");
        let second = SqliteStore::new(pool, "second");
        first.create_collection(2).await.unwrap();
        second.create_collection(2).await.unwrap();

        first
            .add(&[entry("a", "Yoda.txt", vec![1.0, 0.0])])
            .await
            .unwrap();
        second
            .add(&[entry("a", "Yoda.txt", vec![1.0, 0.0])])
            .await
            .unwrap();

        second.drop_collection().await.unwrap();
        assert_eq!(first.count().await.unwrap(), 1);
    }
}
