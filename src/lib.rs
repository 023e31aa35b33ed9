//! # kb-sentinel
//!
//! Incremental vector-index maintenance and guarded retrieval for a plain
//! text knowledge base.
//!
//! The write path keeps a vector store collection in sync with a corpus
//! directory, re-embedding only files whose content fingerprint changed
//! since the last run. The read path retrieves nearest chunks for a query,
//! drops the ones that are not relevant enough, and screens the rest for
//! prompt-injection text before they reach a language model.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌───────────┐   ┌──────────┐
//! │  Corpus  │──▶│  Reconciler  │──▶│  Chunk +  │──▶│  Vector  │
//! │  *.txt   │   │ (via Ledger) │   │  Embed    │   │  Store   │
//! └──────────┘   └──────────────┘   └───────────┘   └────┬─────┘
//!                                                        │
//!          ┌─────────────────────────────────────────────┘
//!          ▼
//!   ┌─────────────┐   ┌──────────────┐   ┌──────────┐   ┌────────────┐
//!   │  Retriever  │──▶│ Relevance    │──▶│ Security │──▶│  Answerer  │
//!   │  (top k)    │   │ Gate         │   │ Filter   │   │  (LLM)     │
//!   └─────────────┘   └──────────────┘   └──────────┘   └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kbs init                       # create the empty collection
//! kbs update                     # index new and modified files
//! kbs update --dry-run           # show what would change
//! kbs search "Who trained Luke?"
//! kbs ask "Who trained Luke?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`fingerprint`] | Content hashes for change detection |
//! | [`corpus`] | Corpus enumeration and document loading |
//! | [`chunk`] | Recursive separator chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Vector store trait, SQLite and in-memory backends |
//! | [`ledger`] | Per-file index state |
//! | [`reconcile`] | Incremental index reconciliation |
//! | [`bootstrap`] | Collection creation and full rebuild |
//! | [`report`] | Run summaries |
//! | [`retrieval`] | Query-time retrieval and relevance gate |
//! | [`security`] | Injection screening of retrieved chunks |
//! | [`prompt`] | Prompt assembly |
//! | [`generation`] | Language model backends |
//! | [`answer`] | Question answering |
//! | [`query_log`] | JSONL query log and its report |
//! | [`commands`] | CLI command implementations |
//! | [`db`] | SQLite connection and schema |

pub mod answer;
pub mod bootstrap;
pub mod chunk;
pub mod commands;
pub mod config;
pub mod corpus;
pub mod db;
pub mod embedding;
pub mod fingerprint;
pub mod generation;
mod http;
pub mod ledger;
pub mod models;
pub mod prompt;
pub mod query_log;
pub mod reconcile;
pub mod report;
pub mod retrieval;
pub mod security;
pub mod store;
