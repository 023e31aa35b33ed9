//! Query-time retrieval: nearest neighbors, relevance gate, screening.
//!
//! ```text
//! query ─► embed ─► store.query(top_k) ─► RetrievalGate ─► SecurityFilter ─► Retrieval
//! ```
//!
//! An empty [`Retrieval`] is a normal outcome meaning the knowledge base
//! has nothing relevant to say.

use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::embedding::{embed_query, EmbeddingProvider};
use crate::models::RetrievedChunk;
use crate::security::{DropRecord, ScreenedChunk, SecurityFilter};
use crate::store::VectorStore;

/// Drops hits whose cosine distance exceeds the threshold. A hit exactly
/// at the threshold passes.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalGate {
    threshold: f32,
}

impl RetrievalGate {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Returns `(passed, gated_out)`, both in input order.
    pub fn apply(&self, results: Vec<RetrievedChunk>) -> (Vec<RetrievedChunk>, usize) {
        let before = results.len();
        let passed: Vec<RetrievedChunk> = results
            .into_iter()
            .filter(|r| r.distance <= self.threshold)
            .collect();
        let gated_out = before - passed.len();
        (passed, gated_out)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    pub chunks: Vec<ScreenedChunk>,
    pub dropped: Vec<DropRecord>,
    /// Hits discarded by the relevance gate.
    pub gated_out: usize,
}

impl Retrieval {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

pub struct Retriever {
    store: Arc<dyn VectorStore>,
    provider: Arc<dyn EmbeddingProvider>,
    gate: RetrievalGate,
    filter: SecurityFilter,
    top_k: usize,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn VectorStore>,
        provider: Arc<dyn EmbeddingProvider>,
        config: &RetrievalConfig,
        filter: SecurityFilter,
    ) -> Self {
        Self {
            store,
            provider,
            gate: RetrievalGate::new(config.relevance_threshold),
            filter,
            top_k: config.top_k,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn filter(&self) -> &SecurityFilter {
        &self.filter
    }

    pub async fn retrieve(&self, query: &str) -> Result<Retrieval> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Retrieval::default());
        }

        let embedding = embed_query(self.provider.as_ref(), query).await?;
        let hits = self.store.query(&embedding, self.top_k).await?;
        let found = hits.len();

        let (relevant, gated_out) = self.gate.apply(hits);
        let screening = self.filter.screen(relevant);

        debug!(
            found,
            gated_out,
            dropped = screening.dropped.len(),
            kept = screening.kept.len(),
            "retrieval"
        );

        Ok(Retrieval {
            chunks: screening.kept,
            dropped: screening.dropped,
            gated_out,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntryMetadata;

    fn hit(id: &str, distance: f32) -> RetrievedChunk {
        RetrievedChunk {
            id: id.to_string(),
            text: format!("text {id}"),
            metadata: EntryMetadata {
                source: "/kb/a.txt".to_string(),
                filename: "a.txt".to_string(),
                title: "a".to_string(),
                chunk_index: 0,
                total_chunks: 1,
            },
            distance,
        }
    }

    #[test]
    fn test_gate_boundary() {
        let gate = RetrievalGate::new(0.5);
        let (passed, gated_out) = gate.apply(vec![hit("a", 0.1), hit("b", 0.5), hit("c", 0.51)]);
        let ids: Vec<_> = passed.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(gated_out, 1);
    }

    #[test]
    fn test_gate_all_irrelevant() {
        let gate = RetrievalGate::new(0.2);
        let (passed, gated_out) = gate.apply(vec![hit("a", 0.9), hit("b", 1.4)]);
        assert!(passed.is_empty());
        assert_eq!(gated_out, 2);
    }
}
