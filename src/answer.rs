//! Question answering over the retrieved, screened context.
//!
//! Generation failures never propagate: the caller gets an [`Answer`] with
//! [`AnswerStatus::GenerationFailed`] and the chunks that were found.
//! Finding nothing relevant is its own status, not an error.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::generation::Generator;
use crate::prompt::build_prompt;
use crate::retrieval::{Retrieval, Retriever};
use crate::security::ScreenedChunk;

pub const NO_KNOWLEDGE_TEXT: &str =
    "I don't know. The knowledge base has no relevant information for this question.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    Answered,
    NoRelevantKnowledge,
    GenerationFailed,
}

impl AnswerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerStatus::Answered => "answered",
            AnswerStatus::NoRelevantKnowledge => "no_relevant_knowledge",
            AnswerStatus::GenerationFailed => "generation_failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub status: AnswerStatus,
    pub text: String,
    pub chunks: Vec<ScreenedChunk>,
    pub reasoning: String,
    pub dropped: usize,
    pub gated_out: usize,
}

impl Answer {
    /// Distinct document titles the answer drew on, in retrieval order.
    pub fn sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = Vec::new();
        for c in &self.chunks {
            if !sources.contains(&c.chunk.metadata.title) {
                sources.push(c.chunk.metadata.title.clone());
            }
        }
        sources
    }
}

pub struct Answerer {
    retriever: Retriever,
    generator: Arc<dyn Generator>,
}

impl Answerer {
    pub fn new(retriever: Retriever, generator: Arc<dyn Generator>) -> Self {
        Self {
            retriever,
            generator,
        }
    }

    /// Answer `query`. Only retrieval errors (embedding or store) are
    /// returned as `Err`.
    pub async fn answer(&self, query: &str) -> Result<Answer> {
        let retrieval = self.retriever.retrieve(query).await?;
        Ok(self.answer_with(query, retrieval).await)
    }

    async fn answer_with(&self, query: &str, retrieval: Retrieval) -> Answer {
        let Retrieval {
            chunks,
            dropped,
            gated_out,
        } = retrieval;

        if chunks.is_empty() {
            info!(gated_out, dropped = dropped.len(), "no relevant knowledge");
            return Answer {
                status: AnswerStatus::NoRelevantKnowledge,
                text: NO_KNOWLEDGE_TEXT.to_string(),
                chunks,
                reasoning: "No relevant chunks were found in the vector store.".to_string(),
                dropped: dropped.len(),
                gated_out,
            };
        }

        let guarded = self.retriever.filter().enabled();
        let prompt = build_prompt(query, &chunks, guarded);

        match self.generator.generate(&prompt).await {
            Ok(text) => Answer {
                status: AnswerStatus::Answered,
                text,
                reasoning: format!(
                    "Found {} relevant fragments in the knowledge base.",
                    chunks.len()
                ),
                chunks,
                dropped: dropped.len(),
                gated_out,
            },
            Err(e) => {
                warn!(model = self.generator.model_name(), error = %format!("{:#}", e), "generation failed");
                Answer {
                    status: AnswerStatus::GenerationFailed,
                    text: format!("An error occurred while generating the answer: {:#}", e),
                    reasoning: format!("Generation error: {:#}", e),
                    chunks,
                    dropped: dropped.len(),
                    gated_out,
                }
            }
        }
    }
}
