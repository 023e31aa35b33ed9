//! Recursive separator text chunker.
//!
//! Splits document text into overlapping [`Chunk`]s of at most
//! `chunk_size` characters. Split points prefer paragraph breaks, then line
//! breaks, then sentence ends (`". "`), then spaces, and finally fall back
//! to a hard cut between characters. Lengths are counted in `char`s.
//!
//! Each separator stays attached to the end of the piece before it, so a
//! sentence keeps its period. Output is deterministic: the same text always
//! produces the same boundaries, which the reconciler relies on when it
//! compares chunk counts across runs.
//!
//! Chunk identifiers are derived from the owning filename and the chunk
//! index (see [`chunk_id`]), so they never depend on the size of the store.

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;

use crate::config::ChunkingConfig;
use crate::models::{Chunk, Document};

/// Separators in priority order. The empty separator means "between any
/// two characters".
const SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            bail!("chunk_size must be > 0");
        }
        if chunk_overlap >= chunk_size {
            bail!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap,
                chunk_size
            );
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Split text into chunk strings. Never returns an empty vector.
    pub fn split(&self, text: &str) -> Vec<String> {
        if char_len(text) <= self.chunk_size {
            return vec![text.to_string()];
        }

        let chunks = self.split_recursive(text, &SEPARATORS);
        if chunks.is_empty() {
            // Only whitespace longer than one chunk ends up here.
            return vec![text.trim().to_string()];
        }
        chunks
    }

    /// Split a document and attach filename, position, and identifiers.
    pub fn chunk_document(&self, doc: &Document) -> Vec<Chunk> {
        let texts = self.split(&doc.text);
        let total = texts.len();
        texts
            .into_iter()
            .enumerate()
            .map(|(index, text)| Chunk {
                id: chunk_id(&doc.filename, index),
                filename: doc.filename.clone(),
                chunk_index: index,
                total_chunks: total,
                text,
            })
            .collect()
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let mut final_chunks = Vec::new();

        // Pick the first separator that actually occurs in the text.
        let mut separator = separators[separators.len() - 1];
        let mut remaining: &[&str] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                separator = sep;
                break;
            }
            if text.contains(sep) {
                separator = sep;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let mut good_splits: Vec<&str> = Vec::new();
        for piece in split_keep_end(text, separator) {
            if char_len(piece) < self.chunk_size {
                good_splits.push(piece);
                continue;
            }

            if !good_splits.is_empty() {
                final_chunks.extend(self.merge_splits(&good_splits));
                good_splits.clear();
            }

            if remaining.is_empty() {
                let trimmed = piece.trim();
                if !trimmed.is_empty() {
                    final_chunks.push(trimmed.to_string());
                }
            } else {
                final_chunks.extend(self.split_recursive(piece, remaining));
            }
        }

        if !good_splits.is_empty() {
            final_chunks.extend(self.merge_splits(&good_splits));
        }

        final_chunks
    }

    /// Greedily pack small pieces into chunks, carrying up to
    /// `chunk_overlap` characters of the previous window forward.
    fn merge_splits(&self, splits: &[&str]) -> Vec<String> {
        let mut docs = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for &piece in splits {
            let len = char_len(piece);

            if total + len > self.chunk_size && !window.is_empty() {
                push_joined(&mut docs, &window);

                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match window.pop_front() {
                        Some(front) => total -= char_len(front),
                        None => break,
                    }
                }
            }

            window.push_back(piece);
            total += len;
        }

        push_joined(&mut docs, &window);
        docs
    }
}

/// Content-derived chunk identifier: `chunk_` followed by the first 32 hex
/// digits of SHA-256(filename, 0x00, index as little-endian u64).
///
/// Unique as long as `(filename, index)` is unique, which holds because a
/// file's previous entries are always deleted before its new ones are added.
pub fn chunk_id(filename: &str, index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(filename.as_bytes());
    hasher.update([0u8]);
    hasher.update((index as u64).to_le_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("chunk_{}", &digest[..32])
}

fn push_joined(docs: &mut Vec<String>, window: &VecDeque<&str>) {
    let joined: String = window.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        docs.push(trimmed.to_string());
    }
}

/// Split `text` after every occurrence of `separator`, keeping the
/// separator on the left-hand piece. An empty separator yields single
/// characters.
fn split_keep_end<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, matched) in text.match_indices(separator) {
        let end = idx + matched.len();
        pieces.push(&text[start..end]);
        start = end;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
