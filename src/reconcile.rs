//! Incremental index reconciliation.
//!
//! The [`Reconciler`] brings the vector store collection in line with the
//! corpus on disk, re-embedding only files whose fingerprint differs from
//! the one recorded in the [`Ledger`].
//!
//! # Run
//!
//! ```text
//! preconditions ──► SCAN ──► (no changes) ──► done, ledger untouched
//!                     │
//!                     └──► PROCESS-FILE × N ──► PERSIST-STATE ──► done
//! ```
//!
//! Preconditions abort before anything is mutated. Failures inside
//! PROCESS-FILE are confined to the file: they are logged, collected as
//! [`FileError`]s, and the run moves on. The ledger is only written at
//! PERSIST-STATE, so an interrupted run leaves the previous ledger in place
//! and the next scan picks the affected files up again.
//!
//! For one file, the new entries are fully prepared (read, chunked,
//! embedded) before the old ones are deleted, and the delete always
//! completes before the first add. Queries running concurrently may see
//! the file with no entries for the duration of that window.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::chunk::Chunker;
use crate::config::{Config, CorpusConfig};
use crate::corpus::{self, CorpusFile};
use crate::embedding::{embed_batched, EmbeddingProvider};
use crate::fingerprint::fingerprint_file;
use crate::ledger::{Ledger, LedgerRecord};
use crate::models::{EntryMetadata, IndexEntry};
use crate::report::{elapsed_secs, FileError, RunSummary};
use crate::store::{MetadataFilter, VectorStore};

/// Fatal outcomes. Anything not listed here is a per-file [`FileError`].
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("corpus missing: {}", .0.display())]
    CorpusMissing(PathBuf),

    #[error("index missing, must be built first (collection '{0}')")]
    IndexMissing(String),

    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error(
        "embedding dimension mismatch: provider '{model}' produces {provider} dims, \
         collection '{collection}' stores {stored}"
    )]
    DimensionMismatch {
        model: String,
        provider: usize,
        collection: String,
        stored: usize,
    },

    #[error("vector store unavailable: {0:#}")]
    Store(anyhow::Error),

    #[error("corpus scan failed: {0:#}")]
    Scan(anyhow::Error),

    #[error("failed to reset ledger: {0:#}")]
    LedgerReset(anyhow::Error),

    /// The store was updated but the ledger could not be written. The
    /// summary describes the mutations that did happen.
    #[error("failed to persist ledger: {cause:#}")]
    Persist {
        cause: anyhow::Error,
        summary: Box<RunSummary>,
    },
}

impl ReconcileError {
    /// The summary attached to a failure that happened after mutation.
    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            ReconcileError::Persist { summary, .. } => Some(&**summary),
            _ => None,
        }
    }
}

/// Batch sizes for one run. Throughput knobs only; they never change the
/// final state of the store.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileSettings {
    pub embed_batch_size: usize,
    pub add_batch_size: usize,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            embed_batch_size: 32,
            add_batch_size: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    New,
    Modified,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::New => "new",
            ChangeKind::Modified => "modified",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlannedChange {
    pub file: CorpusFile,
    pub kind: ChangeKind,
}

/// Result of SCAN: how every corpus file compares to the ledger.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub changes: Vec<PlannedChange>,
    pub unchanged: Vec<String>,
    /// In the ledger but no longer in the corpus. Reported, never acted on.
    pub removed: Vec<String>,
    /// Files that could not be fingerprinted.
    pub errors: Vec<FileError>,
}

impl Plan {
    pub fn new_files(&self) -> Vec<String> {
        self.filenames(ChangeKind::New)
    }

    pub fn modified_files(&self) -> Vec<String> {
        self.filenames(ChangeKind::Modified)
    }

    pub fn is_idle(&self) -> bool {
        self.changes.is_empty()
    }

    fn filenames(&self, kind: ChangeKind) -> Vec<String> {
        self.changes
            .iter()
            .filter(|c| c.kind == kind)
            .map(|c| c.file.filename.clone())
            .collect()
    }
}

#[derive(Debug, Default)]
struct FileProgress {
    removed: usize,
    deleted: bool,
}

pub struct Reconciler {
    corpus: CorpusConfig,
    ledger_path: PathBuf,
    chunker: Chunker,
    store: Arc<dyn VectorStore>,
    provider: Arc<dyn EmbeddingProvider>,
    settings: ReconcileSettings,
}

impl Reconciler {
    pub fn new(
        corpus: CorpusConfig,
        ledger_path: PathBuf,
        chunker: Chunker,
        store: Arc<dyn VectorStore>,
        provider: Arc<dyn EmbeddingProvider>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            corpus,
            ledger_path,
            chunker,
            store,
            provider,
            settings,
        }
    }

    /// Build a reconciler from the loaded configuration.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn VectorStore>,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> anyhow::Result<Self> {
        Ok(Self::new(
            config.corpus.clone(),
            config.ledger.path.clone(),
            Chunker::from_config(&config.chunking)?,
            store,
            provider,
            ReconcileSettings {
                embed_batch_size: config.embedding.batch_size,
                add_batch_size: config.index.add_batch_size,
            },
        ))
    }

    pub fn ledger_path(&self) -> &std::path::Path {
        &self.ledger_path
    }

    /// Classify the corpus against the ledger without mutating anything.
    ///
    /// Only the corpus and collection preconditions apply; the embedding
    /// provider is not consulted.
    pub async fn plan(&self) -> Result<Plan, ReconcileError> {
        self.check_corpus()?;
        self.check_collection().await?;
        let ledger = Ledger::load(&self.ledger_path);
        self.scan(&ledger)
    }

    /// Run one reconciliation pass.
    pub async fn run(&self) -> Result<RunSummary, ReconcileError> {
        let start_time = Utc::now();

        self.check_corpus()?;
        let stored_dims = self.check_collection().await?;
        self.check_provider(stored_dims)?;

        let mut ledger = Ledger::load(&self.ledger_path);
        let plan = self.scan(&ledger)?;
        let initial_chunks_count = self.store.count().await.map_err(ReconcileError::Store)?;

        info!(
            new = plan.new_files().len(),
            modified = plan.modified_files().len(),
            unchanged = plan.unchanged.len(),
            missing = plan.removed.len(),
            "scan complete"
        );
        for filename in &plan.removed {
            warn!(file = %filename, "file in ledger is no longer in the corpus");
        }

        let mut errors: Vec<FileError> = plan.errors.clone();

        if plan.is_idle() {
            info!("no new or modified files, index is up to date");
            let end_time = Utc::now();
            return Ok(RunSummary {
                success: errors.is_empty(),
                start_time,
                end_time,
                elapsed_time_seconds: elapsed_secs(start_time, end_time),
                updated_files: 0,
                new_chunks: 0,
                removed_chunks: 0,
                initial_chunks_count,
                final_chunks_count: initial_chunks_count,
                new_files: Vec::new(),
                modified_files: Vec::new(),
                unchanged_files: plan.unchanged.len(),
                removed_files: plan.removed.clone(),
                errors: errors.iter().map(|e| e.to_string()).collect(),
            });
        }

        let mut updated_files = 0usize;
        let mut new_chunks = 0usize;
        let mut removed_chunks = 0usize;
        let total = plan.changes.len();

        for (i, change) in plan.changes.iter().enumerate() {
            let filename = &change.file.filename;
            info!(
                file = %filename,
                kind = change.kind.as_str(),
                "[{}/{}] processing",
                i + 1,
                total
            );

            let mut progress = FileProgress::default();
            match self.process_file(change, &mut progress).await {
                Ok(record) => {
                    info!(file = %filename, chunks = record.chunks_count, removed = progress.removed, "indexed");
                    new_chunks += record.chunks_count;
                    updated_files += 1;
                    ledger.record(filename, record);
                }
                Err(e) => {
                    error!(file = %filename, error = %format!("{:#}", e), "failed to index file");
                    if progress.deleted {
                        // Old entries are gone; forget the record so the
                        // next run treats the file as new.
                        ledger.processed_files.remove(filename);
                    }
                    errors.push(FileError {
                        filename: filename.clone(),
                        message: format!("{:#}", e),
                    });
                }
            }
            removed_chunks += progress.removed;
        }

        ledger.last_update = Some(start_time);

        let final_chunks_count = match self.store.count().await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "could not count index entries after run");
                (initial_chunks_count + new_chunks).saturating_sub(removed_chunks)
            }
        };

        let end_time = Utc::now();
        let summary = RunSummary {
            success: errors.is_empty(),
            start_time,
            end_time,
            elapsed_time_seconds: elapsed_secs(start_time, end_time),
            updated_files,
            new_chunks,
            removed_chunks,
            initial_chunks_count,
            final_chunks_count,
            new_files: plan.new_files(),
            modified_files: plan.modified_files(),
            unchanged_files: plan.unchanged.len(),
            removed_files: plan.removed.clone(),
            errors: errors.iter().map(|e| e.to_string()).collect(),
        };

        if let Err(cause) = ledger.save(&self.ledger_path) {
            error!(path = %self.ledger_path.display(), error = %format!("{:#}", cause), "failed to save ledger");
            let mut summary = summary;
            summary.success = false;
            summary.errors.push(format!("failed to persist ledger: {:#}", cause));
            return Err(ReconcileError::Persist {
                cause,
                summary: Box::new(summary),
            });
        }

        info!(
            updated = updated_files,
            new_chunks,
            removed_chunks,
            total = final_chunks_count,
            errors = summary.errors.len(),
            "reconciliation finished"
        );
        Ok(summary)
    }

    fn check_corpus(&self) -> Result<(), ReconcileError> {
        if !self.corpus.root.is_dir() {
            return Err(ReconcileError::CorpusMissing(self.corpus.root.clone()));
        }
        Ok(())
    }

    async fn check_collection(&self) -> Result<usize, ReconcileError> {
        self.store
            .collection_dims()
            .await
            .map_err(ReconcileError::Store)?
            .ok_or_else(|| ReconcileError::IndexMissing(self.store.collection().to_string()))
    }

    fn check_provider(&self, stored_dims: usize) -> Result<(), ReconcileError> {
        let dims = self.provider.dims();
        if dims == 0 {
            return Err(ReconcileError::ProviderUnavailable(
                self.provider.model_name().to_string(),
            ));
        }
        if dims != stored_dims {
            return Err(ReconcileError::DimensionMismatch {
                model: self.provider.model_name().to_string(),
                provider: dims,
                collection: self.store.collection().to_string(),
                stored: stored_dims,
            });
        }
        Ok(())
    }

    fn scan(&self, ledger: &Ledger) -> Result<Plan, ReconcileError> {
        let files = corpus::scan(&self.corpus).map_err(ReconcileError::Scan)?;
        let mut plan = Plan::default();

        for file in &files {
            let fingerprint = match fingerprint_file(&file.path) {
                Ok(fp) => fp,
                Err(e) => {
                    warn!(file = %file.filename, error = %e, "could not fingerprint file");
                    plan.errors.push(FileError {
                        filename: file.filename.clone(),
                        message: format!("{:#}", e),
                    });
                    continue;
                }
            };

            let kind = match ledger.get(&file.filename) {
                None => ChangeKind::New,
                Some(record) if !fingerprint.matches(record) => ChangeKind::Modified,
                Some(_) => {
                    debug!(file = %file.filename, "unchanged");
                    plan.unchanged.push(file.filename.clone());
                    continue;
                }
            };
            plan.changes.push(PlannedChange {
                file: file.clone(),
                kind,
            });
        }

        plan.removed = ledger
            .processed_files
            .keys()
            .filter(|name| !files.iter().any(|f| &f.filename == *name))
            .cloned()
            .collect();

        Ok(plan)
    }

    async fn process_file(
        &self,
        change: &PlannedChange,
        progress: &mut FileProgress,
    ) -> anyhow::Result<LedgerRecord> {
        let doc = corpus::load_document(&change.file)?;
        let chunks = self.chunker.chunk_document(&doc);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_batched(
            self.provider.as_ref(),
            &texts,
            self.settings.embed_batch_size,
        )
        .await?;

        let source = doc.source.display().to_string();
        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| IndexEntry {
                id: chunk.id,
                embedding,
                document: chunk.text,
                metadata: EntryMetadata {
                    source: source.clone(),
                    filename: chunk.filename,
                    title: doc.title.clone(),
                    chunk_index: chunk.chunk_index,
                    total_chunks: chunk.total_chunks,
                },
            })
            .collect();

        progress.deleted = true;
        progress.removed = self
            .store
            .delete_where(&MetadataFilter::filename(&doc.filename))
            .await?;

        for batch in entries.chunks(self.settings.add_batch_size.max(1)) {
            self.store.add(batch).await?;
        }

        Ok(LedgerRecord {
            hash: doc.hash,
            mtime: doc.mtime,
            chunks_count: entries.len(),
            last_processed: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashedProvider;
    use crate::store::memory::InMemoryStore;

    fn reconciler(root: &std::path::Path, store: Arc<InMemoryStore>, dims: usize) -> Reconciler {
        Reconciler::new(
            CorpusConfig {
                root: root.to_path_buf(),
                include_globs: vec!["*.txt".to_string()],
                exclude_globs: vec![],
                follow_symlinks: false,
            },
            root.join("state").join("update_state.json"),
            Chunker::new(200, 40).unwrap(),
            store,
            Arc::new(HashedProvider::new(dims)),
            ReconcileSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_missing_collection_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        let store = Arc::new(InMemoryStore::new("kb"));
        let err = reconciler(dir.path(), store, 8).run().await.unwrap_err();
        assert!(matches!(err, ReconcileError::IndexMissing(_)));
        assert!(err.to_string().contains("must be built first"));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryStore::with_collection("kb", 4));
        let err = reconciler(dir.path(), store, 8).run().await.unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::DimensionMismatch {
                provider: 8,
                stored: 4,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_plan_classifies_without_mutation() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        let store = Arc::new(InMemoryStore::with_collection("kb", 8));
        let rec = reconciler(dir.path(), store.clone(), 8);

        let plan = rec.plan().await.unwrap();
        assert_eq!(plan.new_files(), vec!["a.txt".to_string()]);
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(!rec.ledger_path().exists());
    }

    #[tokio::test]
    async fn test_removed_files_reported_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        std::fs::write(dir.path().join("b.txt"), "beta").unwrap();
        let store = Arc::new(InMemoryStore::with_collection("kb", 8));
        let rec = reconciler(dir.path(), store.clone(), 8);
        rec.run().await.unwrap();

        std::fs::remove_file(dir.path().join("b.txt")).unwrap();
        let summary = rec.run().await.unwrap();
        assert_eq!(summary.removed_files, vec!["b.txt".to_string()]);
        assert_eq!(summary.updated_files, 0);
        assert_eq!(store.count().await.unwrap(), 2);
    }
}
