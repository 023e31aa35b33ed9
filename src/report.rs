//! Run summaries.
//!
//! Every reconciler run (successful, partially failed, or aborted on a
//! precondition) produces a [`RunSummary`]. The CLI prints it and, when
//! `[report] dir` is configured, writes it as
//! `update_result_<YYYYmmdd_HHMMSS>.json`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// A failure confined to one corpus file. The run continues past it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileError {
    pub filename: String,
    pub message: String,
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.filename, self.message)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub success: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub elapsed_time_seconds: f64,
    pub updated_files: usize,
    pub new_chunks: usize,
    pub removed_chunks: usize,
    pub initial_chunks_count: usize,
    pub final_chunks_count: usize,
    pub new_files: Vec<String>,
    pub modified_files: Vec<String>,
    pub unchanged_files: usize,
    /// Ledger entries whose file is no longer in the corpus.
    pub removed_files: Vec<String>,
    pub errors: Vec<String>,
}

impl RunSummary {
    /// Summary for a run that aborted before touching the index.
    pub fn aborted(start_time: DateTime<Utc>, cause: &str) -> Self {
        let end_time = Utc::now();
        Self {
            success: false,
            start_time,
            end_time,
            elapsed_time_seconds: elapsed_secs(start_time, end_time),
            updated_files: 0,
            new_chunks: 0,
            removed_chunks: 0,
            initial_chunks_count: 0,
            final_chunks_count: 0,
            new_files: Vec::new(),
            modified_files: Vec::new(),
            unchanged_files: 0,
            removed_files: Vec::new(),
            errors: vec![cause.to_string()],
        }
    }

    /// Print the summary in `key: value` form.
    pub fn print(&self, title: &str) {
        println!("{}", title);
        println!("  new files: {}", self.new_files.len());
        println!("  modified files: {}", self.modified_files.len());
        println!("  unchanged files: {}", self.unchanged_files);
        if !self.removed_files.is_empty() {
            println!("  missing from corpus: {}", self.removed_files.len());
        }
        println!("  updated files: {}", self.updated_files);
        println!("  new chunks: {}", self.new_chunks);
        println!("  removed chunks: {}", self.removed_chunks);
        println!("  index size before: {}", self.initial_chunks_count);
        println!("  index size after: {}", self.final_chunks_count);
        println!("  elapsed: {:.2}s", self.elapsed_time_seconds);
        println!("  errors: {}", self.errors.len());
        for error in &self.errors {
            println!("    - {}", error);
        }
        println!("{}", if self.success { "ok" } else { "failed" });
    }
}

pub(crate) fn elapsed_secs(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start)
        .to_std()
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Write `summary` into `dir`, returning the artifact path.
pub fn write_summary(dir: &Path, summary: &RunSummary) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create report directory: {}", dir.display()))?;
    let path = dir.join(format!(
        "update_result_{}.json",
        summary.start_time.format("%Y%m%d_%H%M%S")
    ));
    let json = serde_json::to_string_pretty(summary)?;
    std::fs::write(&path, json)
        .with_context(|| format!("Failed to write run summary: {}", path.display()))?;
    Ok(path)
}
