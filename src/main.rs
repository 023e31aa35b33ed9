//! # kb-sentinel CLI (`kbs`)
//!
//! ## Usage
//!
//! ```bash
//! kbs --config ./config/kbs.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kbs init` | Create the empty collection sized for the embedding provider |
//! | `kbs build` | Drop and rebuild the whole index from the corpus |
//! | `kbs update` | Index new and modified corpus files |
//! | `kbs status` | Show ledger, index, and pending changes |
//! | `kbs search "<query>"` | Retrieve relevant, screened chunks |
//! | `kbs ask "<query>"` | Answer a question from the knowledge base |
//! | `kbs log-report` | Summarize the query log |
//!
//! ## Exit codes
//!
//! `0` success, `1` failure (including any per-file error during an
//! update), `130` interrupted.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use kb_sentinel::commands;
use kb_sentinel::config;

/// kb-sentinel: incremental vector-index maintenance and guarded retrieval.
#[derive(Parser)]
#[command(
    name = "kbs",
    about = "Incremental vector-index maintenance and guarded retrieval for a text knowledge base",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kbs.toml")]
    config: PathBuf,

    /// Debug-level logging.
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Only log warnings and errors.
    #[arg(long, short, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the empty collection. Idempotent.
    Init,

    /// Drop the collection and ledger, then index the whole corpus.
    Build,

    /// Reconcile the index with the corpus.
    ///
    /// Only files whose content hash or modification time differs from the
    /// ledger are re-chunked and re-embedded.
    Update {
        /// Classify files without touching the index or the ledger.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show ledger and index sizes and pending changes.
    Status,

    /// Retrieve the chunks that pass the relevance gate and security filter.
    Search {
        query: String,

        /// Number of nearest neighbors to retrieve.
        #[arg(long)]
        top_k: Option<usize>,

        /// Skip injection screening.
        #[arg(long)]
        no_protection: bool,
    },

    /// Answer a question using the knowledge base.
    Ask {
        query: String,

        #[arg(long)]
        top_k: Option<usize>,

        #[arg(long)]
        no_protection: bool,
    },

    /// Summarize the query log: success rate, failures by question kind,
    /// most cited sources.
    LogReport {
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if quiet {
        EnvFilter::new("warn")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => commands::run_init(&cfg).await,
        Commands::Build => commands::run_build(&cfg).await,
        Commands::Update { dry_run } => commands::run_update(&cfg, dry_run).await,
        Commands::Status => commands::run_status(&cfg).await,
        Commands::Search {
            query,
            top_k,
            no_protection,
        } => commands::run_search(&cfg, &query, top_k, no_protection).await,
        Commands::Ask {
            query,
            top_k,
            no_protection,
        } => commands::run_ask(&cfg, &query, top_k, no_protection).await,
        Commands::LogReport { json } => commands::run_log_report(&cfg, json),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    tokio::select! {
        result = run(cli) => match result {
            Ok(true) => ExitCode::SUCCESS,
            Ok(false) => ExitCode::from(1),
            Err(e) => {
                eprintln!("Error: {:#}", e);
                ExitCode::from(1)
            }
        },
        _ = tokio::signal::ctrl_c() => {
            eprintln!("interrupted");
            ExitCode::from(130)
        }
    }
}
