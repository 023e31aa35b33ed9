//! CLI command implementations.
//!
//! Each `run_*` function prints its result to stdout in `key: value` form
//! and returns whether the command succeeded. Errors that prevent a command
//! from producing a result at all are returned as `Err`.

use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Utc;
use tracing::warn;

use crate::answer::Answerer;
use crate::bootstrap;
use crate::config::Config;
use crate::db;
use crate::embedding::{create_provider, DisabledProvider, EmbeddingProvider};
use crate::generation::create_generator;
use crate::ledger::Ledger;
use crate::query_log::{QueryLog, QueryLogEntry, QueryLogReport};
use crate::reconcile::{Plan, ReconcileError, Reconciler};
use crate::report::{self, RunSummary};
use crate::retrieval::Retriever;
use crate::security::{SecurityFilter, RULESET_VERSION};
use crate::store::sqlite::SqliteStore;
use crate::store::VectorStore;

async fn open_store(config: &Config) -> Result<Arc<SqliteStore>> {
    let pool = db::connect(&config.index.path).await?;
    Ok(Arc::new(SqliteStore::new(pool, config.index.collection.clone())))
}

/// Build the configured provider. A provider that cannot be constructed
/// (missing API key, unknown model) is logged and replaced by the disabled
/// one so the reconciler reports it in its usual precondition order.
fn provider_or_disabled(config: &Config) -> Arc<dyn EmbeddingProvider> {
    match create_provider(&config.embedding) {
        Ok(provider) => provider,
        Err(e) => {
            warn!(error = %format!("{:#}", e), "embedding provider unavailable");
            Arc::new(DisabledProvider)
        }
    }
}

pub async fn run_init(config: &Config) -> Result<bool> {
    let store = open_store(config).await?;
    let provider = create_provider(&config.embedding)?;
    let dims = bootstrap::init_index(store.as_ref(), provider.as_ref()).await?;
    let count = store.count().await?;

    println!("init");
    println!("  index: {}", config.index.path.display());
    println!("  collection: {}", store.collection());
    println!("  dims: {}", dims);
    println!("  entries: {}", count);
    println!("ok");

    store.close().await;
    Ok(true)
}

pub async fn run_build(config: &Config) -> Result<bool> {
    let start_time = Utc::now();
    let store = open_store(config).await?;
    let provider = provider_or_disabled(config);
    let reconciler = Reconciler::from_config(config, store.clone(), provider.clone())?;

    let result = bootstrap::build_index(
        store.as_ref(),
        provider.as_ref(),
        &reconciler,
        &config.corpus.root,
    )
    .await;
    let ok = finish_run(config, "build", start_time, result);

    store.close().await;
    Ok(ok)
}

pub async fn run_update(config: &Config, dry_run: bool) -> Result<bool> {
    let start_time = Utc::now();
    let store = open_store(config).await?;
    let provider = provider_or_disabled(config);
    let reconciler = Reconciler::from_config(config, store.clone(), provider)?;

    let ok = if dry_run {
        match reconciler.plan().await {
            Ok(plan) => {
                print_plan("update (dry-run)", &plan);
                plan.errors.is_empty()
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                false
            }
        }
    } else {
        let result = reconciler.run().await;
        finish_run(config, "update", start_time, result)
    };

    store.close().await;
    Ok(ok)
}

/// Print the outcome of a reconciler run and write its summary artifact.
fn finish_run(
    config: &Config,
    title: &str,
    start_time: chrono::DateTime<Utc>,
    result: Result<RunSummary, ReconcileError>,
) -> bool {
    let summary = match result {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.summary()
                .cloned()
                .unwrap_or_else(|| RunSummary::aborted(start_time, &e.to_string()))
        }
    };

    summary.print(title);

    if let Some(dir) = &config.report.dir {
        match report::write_summary(dir, &summary) {
            Ok(path) => println!("  report: {}", path.display()),
            Err(e) => warn!(error = %format!("{:#}", e), "could not write run summary"),
        }
    }

    summary.success
}

fn print_plan(title: &str, plan: &Plan) {
    println!("{}", title);
    for name in plan.new_files() {
        println!("  new: {}", name);
    }
    for name in plan.modified_files() {
        println!("  modified: {}", name);
    }
    for name in &plan.removed {
        println!("  missing from corpus: {}", name);
    }
    for error in &plan.errors {
        println!("  error: {}", error);
    }
    println!("  new files: {}", plan.new_files().len());
    println!("  modified files: {}", plan.modified_files().len());
    println!("  unchanged files: {}", plan.unchanged.len());
}

pub async fn run_status(config: &Config) -> Result<bool> {
    let store = open_store(config).await?;
    let ledger = Ledger::load(&config.ledger.path);

    println!("status");
    println!("  corpus: {}", config.corpus.root.display());
    println!("  index: {}", config.index.path.display());
    println!("  collection: {}", store.collection());
    match store.collection_dims().await? {
        Some(dims) => {
            println!("  dims: {}", dims);
            println!("  entries: {}", store.count().await?);
        }
        None => println!("  entries: (collection missing, run `kbs init` or `kbs build`)"),
    }
    println!("  ledger files: {}", ledger.len());
    println!("  ledger chunks: {}", ledger.total_chunks());
    match ledger.last_update {
        Some(ts) => println!("  last update: {}", ts.to_rfc3339()),
        None => println!("  last update: never"),
    }
    println!("  embedding provider: {}", config.embedding.provider);
    println!("  protection: {}", config.security.enable_protection);
    println!("  ruleset: {}", RULESET_VERSION);

    let reconciler = Reconciler::from_config(config, store.clone(), Arc::new(DisabledProvider))?;
    if let Ok(plan) = reconciler.plan().await {
        println!("  pending new: {}", plan.new_files().len());
        println!("  pending modified: {}", plan.modified_files().len());
    }

    store.close().await;
    Ok(true)
}

async fn build_retriever(
    config: &Config,
    store: Arc<SqliteStore>,
    top_k: Option<usize>,
    no_protection: bool,
) -> Result<Retriever> {
    let provider = create_provider(&config.embedding)?;
    let mut security = config.security.clone();
    if no_protection {
        security.enable_protection = false;
    }
    let filter = SecurityFilter::new(&security)?;
    let mut retriever = Retriever::new(store, provider, &config.retrieval, filter);
    if let Some(k) = top_k {
        retriever = retriever.with_top_k(k);
    }
    Ok(retriever)
}

pub async fn run_search(
    config: &Config,
    query: &str,
    top_k: Option<usize>,
    no_protection: bool,
) -> Result<bool> {
    let store = open_store(config).await?;
    let retriever = build_retriever(config, store.clone(), top_k, no_protection).await?;
    let retrieval = retriever.retrieve(query).await?;

    if retrieval.is_empty() {
        println!("No results.");
    }
    for (i, screened) in retrieval.chunks.iter().enumerate() {
        let chunk = &screened.chunk;
        println!(
            "{}. [{:.4}] {} ({}/{})",
            i + 1,
            chunk.distance,
            chunk.metadata.title,
            chunk.metadata.chunk_index + 1,
            chunk.metadata.total_chunks
        );
        println!("    file: {}", chunk.metadata.filename);
        if screened.cleaned {
            println!("    cleaned: true");
        }
        if !screened.sensitive.is_empty() {
            println!("    sensitive: {}", screened.sensitive.join(", "));
        }
        println!("    excerpt: \"{}\"", excerpt(&chunk.text, 160));
        println!("    id: {}", chunk.id);
        println!();
    }
    println!("  gated out: {}", retrieval.gated_out);
    println!("  dropped: {}", retrieval.dropped.len());
    for record in &retrieval.dropped {
        println!("    - {} ({}) rule={}", record.id, record.filename, record.rule);
    }

    store.close().await;
    Ok(true)
}

pub async fn run_ask(
    config: &Config,
    query: &str,
    top_k: Option<usize>,
    no_protection: bool,
) -> Result<bool> {
    let store = open_store(config).await?;
    let retriever = build_retriever(config, store.clone(), top_k, no_protection).await?;
    let generator = create_generator(&config.generation)?;
    let answer = Answerer::new(retriever, generator).answer(query).await?;

    println!("{}", answer.text);
    println!();
    println!("  status: {}", answer.status.as_str());
    println!("  chunks: {}", answer.chunks.len());
    println!("  sources: {}", answer.sources().join(", "));
    println!("  gated out: {}", answer.gated_out);
    println!("  dropped: {}", answer.dropped);
    println!("  reasoning: {}", answer.reasoning);

    if let Some(path) = &config.query_log.path {
        let log = QueryLog::new(path);
        if let Err(e) = log.append(&QueryLogEntry::from_answer(query, &answer)) {
            warn!(error = %format!("{:#}", e), "could not append to query log");
        }
    }

    store.close().await;
    Ok(true)
}

/// Summarize the query log: success rate, failing question kinds, most
/// cited sources.
pub fn run_log_report(config: &Config, json: bool) -> Result<bool> {
    let Some(path) = &config.query_log.path else {
        bail!("query_log.path is not configured");
    };
    let entries = QueryLog::new(path).read_all()?;
    let report = QueryLogReport::summarize(&entries);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        report.print();
    }
    Ok(true)
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    let trimmed = flat.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}
