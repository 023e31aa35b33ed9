//! Core data models used throughout kb-sentinel.
//!
//! These types represent the documents, chunks, index entries, and
//! retrieved results that flow through the reconciliation (write) and
//! retrieval (read) paths.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A corpus document as seen by the reconciler.
///
/// `filename` is the stable identifier: the path relative to the corpus
/// root, `/`-separated. For a flat corpus it is the bare file name.
#[derive(Debug, Clone)]
pub struct Document {
    pub filename: String,
    pub source: PathBuf,
    pub title: String,
    pub text: String,
    pub hash: String,
    pub mtime: f64,
}

/// A chunk of a document's text, ready to be embedded.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub filename: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub text: String,
}

/// Metadata stored alongside every index entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub source: String,
    pub filename: String,
    pub title: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
}

/// A persisted vector store record.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub id: String,
    pub embedding: Vec<f32>,
    pub document: String,
    pub metadata: EntryMetadata,
}

/// A nearest-neighbor hit. Transient; lives for one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub id: String,
    pub text: String,
    pub metadata: EntryMetadata,
    /// Cosine distance to the query (`1 - cosine similarity`).
    pub distance: f32,
}
