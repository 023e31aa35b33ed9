//! Append-only JSONL log of answered queries, and the report built from it.
//!
//! [`QueryLogReport::summarize`] turns the log into coverage statistics:
//! how many questions were answered, which kinds of question fail, which
//! documents are cited most, and which failures happened even though
//! chunks were found (a sign the retrieved sources were not relevant).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::answer::{Answer, AnswerStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub title: String,
    pub filename: String,
    pub distance: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryLogEntry {
    pub timestamp: DateTime<Utc>,
    pub query: String,
    pub answer: String,
    pub answer_length: usize,
    pub status: String,
    pub success: bool,
    pub chunks_found: bool,
    pub chunks_count: usize,
    pub dropped_count: usize,
    pub sources: Vec<SourceRef>,
    pub reasoning: String,
}

impl QueryLogEntry {
    pub fn from_answer(query: &str, answer: &Answer) -> Self {
        let sources = answer
            .chunks
            .iter()
            .map(|c| SourceRef {
                title: c.chunk.metadata.title.clone(),
                filename: c.chunk.metadata.filename.clone(),
                distance: c.chunk.distance,
            })
            .collect();

        Self {
            timestamp: Utc::now(),
            query: query.to_string(),
            answer: answer.text.clone(),
            answer_length: answer.text.chars().count(),
            status: answer.status.as_str().to_string(),
            success: answer.status == AnswerStatus::Answered,
            chunks_found: !answer.chunks.is_empty(),
            chunks_count: answer.chunks.len(),
            dropped_count: answer.dropped,
            sources,
            reasoning: answer.reasoning.clone(),
        }
    }
}

pub struct QueryLog {
    path: PathBuf,
}

impl QueryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &QueryLogEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let line = serde_json::to_string(entry)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open query log: {}", self.path.display()))?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    /// Read every entry back, skipping malformed lines.
    pub fn read_all(&self) -> Result<Vec<QueryLogEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read query log: {}", self.path.display()))?;
        Ok(content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

const FAILED_EXAMPLES: usize = 10;
const TOP_SOURCES: usize = 10;
const IRRELEVANT_EXAMPLES: usize = 5;
const EXCERPT_CHARS: usize = 100;

/// Rough question category, taken from the interrogative in the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryCategory {
    Person,
    Concept,
    Place,
    Unknown,
}

impl QueryCategory {
    pub fn of(query: &str) -> Self {
        let lower = query.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let has = |candidates: &[&str]| words.iter().any(|w| candidates.contains(w));

        if has(&["who", "whom", "whose", "кто"]) {
            QueryCategory::Person
        } else if has(&["what", "how", "что", "как"]) {
            QueryCategory::Concept
        } else if has(&["where", "planet", "где", "планета"]) {
            QueryCategory::Place
        } else {
            QueryCategory::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryCategory::Person => "person",
            QueryCategory::Concept => "concept",
            QueryCategory::Place => "place",
            QueryCategory::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedQuery {
    pub query: String,
    pub status: String,
    pub category: QueryCategory,
    pub chunks_found: bool,
    pub chunks_count: usize,
    pub answer_excerpt: String,
}

/// A failed query that still had chunks to work with.
#[derive(Debug, Clone, Serialize)]
pub struct IrrelevantSources {
    pub query: String,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceUsage {
    pub title: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryLogReport {
    pub total_queries: usize,
    pub successful_queries: usize,
    pub failed_queries: usize,
    /// Percentage, `0.0` for an empty log.
    pub success_rate: f64,
    pub average_answer_length: f64,
    pub failed_by_category: BTreeMap<QueryCategory, usize>,
    pub failed_examples: Vec<FailedQuery>,
    pub top_sources: Vec<SourceUsage>,
    pub irrelevant_sources_count: usize,
    pub irrelevant_examples: Vec<IrrelevantSources>,
}

impl QueryLogReport {
    pub fn summarize(entries: &[QueryLogEntry]) -> Self {
        let total_queries = entries.len();
        let successful_queries = entries.iter().filter(|e| e.success).count();
        let failed_queries = total_queries - successful_queries;

        let (success_rate, average_answer_length) = if total_queries == 0 {
            (0.0, 0.0)
        } else {
            let total_length: usize = entries.iter().map(|e| e.answer_length).sum();
            (
                successful_queries as f64 / total_queries as f64 * 100.0,
                total_length as f64 / total_queries as f64,
            )
        };

        let mut failed_by_category = BTreeMap::new();
        let mut failed_examples = Vec::new();
        let mut irrelevant_sources_count = 0;
        let mut irrelevant_examples = Vec::new();

        for entry in entries.iter().filter(|e| !e.success) {
            let category = QueryCategory::of(&entry.query);
            *failed_by_category.entry(category).or_insert(0) += 1;

            if failed_examples.len() < FAILED_EXAMPLES {
                failed_examples.push(FailedQuery {
                    query: entry.query.clone(),
                    status: entry.status.clone(),
                    category,
                    chunks_found: entry.chunks_found,
                    chunks_count: entry.chunks_count,
                    answer_excerpt: excerpt(&entry.answer, EXCERPT_CHARS),
                });
            }

            if entry.chunks_found {
                irrelevant_sources_count += 1;
                if irrelevant_examples.len() < IRRELEVANT_EXAMPLES {
                    irrelevant_examples.push(IrrelevantSources {
                        query: entry.query.clone(),
                        sources: entry.sources.iter().map(|s| s.title.clone()).collect(),
                    });
                }
            }
        }

        let mut usage: BTreeMap<&str, usize> = BTreeMap::new();
        for source in entries.iter().flat_map(|e| e.sources.iter()) {
            *usage.entry(source.title.as_str()).or_insert(0) += 1;
        }
        let mut top_sources: Vec<SourceUsage> = usage
            .into_iter()
            .map(|(title, count)| SourceUsage {
                title: title.to_string(),
                count,
            })
            .collect();
        // Stable sort keeps titles alphabetical within equal counts.
        top_sources.sort_by(|a, b| b.count.cmp(&a.count));
        top_sources.truncate(TOP_SOURCES);

        Self {
            total_queries,
            successful_queries,
            failed_queries,
            success_rate,
            average_answer_length,
            failed_by_category,
            failed_examples,
            top_sources,
            irrelevant_sources_count,
            irrelevant_examples,
        }
    }

    /// The category with the most failures, ties broken by category order.
    pub fn weakest_category(&self) -> Option<QueryCategory> {
        self.failed_by_category
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            .map(|(category, _)| *category)
    }

    pub fn print(&self) {
        println!("query log report");
        println!("  total queries: {}", self.total_queries);
        println!("  successful: {}", self.successful_queries);
        println!("  failed: {}", self.failed_queries);
        println!("  success rate: {:.2}%", self.success_rate);
        println!("  average answer length: {:.0}", self.average_answer_length);

        if !self.failed_by_category.is_empty() {
            println!("  failed by category:");
            for (category, count) in &self.failed_by_category {
                println!("    {}: {}", category.as_str(), count);
            }
        }
        if !self.failed_examples.is_empty() {
            println!("  failed queries:");
            for (i, failed) in self.failed_examples.iter().enumerate() {
                println!(
                    "    {}. {} [{}, {}, chunks={}]",
                    i + 1,
                    failed.query,
                    failed.status,
                    failed.category.as_str(),
                    failed.chunks_count
                );
            }
        }
        if !self.top_sources.is_empty() {
            println!("  top sources:");
            for source in &self.top_sources {
                println!("    {}: {}", source.title, source.count);
            }
        }
        println!(
            "  failed with chunks found: {}",
            self.irrelevant_sources_count
        );
        for example in &self.irrelevant_examples {
            println!("    - {} <- {}", example.query, example.sources.join(", "));
        }
        if self.total_queries > 0 && self.success_rate < 70.0 {
            println!("  warning: success rate below 70%, the knowledge base has gaps");
        }
        if let Some(category) = self.weakest_category() {
            println!("  weakest category: {}", category.as_str());
        }
    }
}

fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answer::NO_KNOWLEDGE_TEXT;

    #[test]
    fn test_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let log = QueryLog::new(dir.path().join("logs").join("queries.jsonl"));

        let answer = Answer {
            status: AnswerStatus::NoRelevantKnowledge,
            text: NO_KNOWLEDGE_TEXT.to_string(),
            chunks: Vec::new(),
            reasoning: "nothing".to_string(),
            dropped: 1,
            gated_out: 3,
        };
        log.append(&QueryLogEntry::from_answer("Who is Jar Jar?", &answer))
            .unwrap();
        log.append(&QueryLogEntry::from_answer("Who is Yoda?", &answer))
            .unwrap();

        let entries = log.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].query, "Who is Jar Jar?");
        assert_eq!(entries[0].status, "no_relevant_knowledge");
        assert!(!entries[0].success);
        assert!(!entries[0].chunks_found);
        assert_eq!(entries[1].dropped_count, 1);
    }

    fn logged(query: &str, status: &str, answer: &str, sources: &[&str]) -> QueryLogEntry {
        QueryLogEntry {
            timestamp: Utc::now(),
            query: query.to_string(),
            answer: answer.to_string(),
            answer_length: answer.chars().count(),
            status: status.to_string(),
            success: status == "answered",
            chunks_found: !sources.is_empty(),
            chunks_count: sources.len(),
            dropped_count: 0,
            sources: sources
                .iter()
                .map(|title| SourceRef {
                    title: title.to_string(),
                    filename: format!("{}.txt", title.replace(' ', "_")),
                    distance: 0.3,
                })
                .collect(),
            reasoning: String::new(),
        }
    }

    #[test]
    fn test_query_category() {
        assert_eq!(QueryCategory::of("Who trained Luke?"), QueryCategory::Person);
        assert_eq!(QueryCategory::of("Кто такой Йода?"), QueryCategory::Person);
        assert_eq!(QueryCategory::of("How does a lightsaber work?"), QueryCategory::Concept);
        assert_eq!(QueryCategory::of("Where is Dagobah?"), QueryCategory::Place);
        assert_eq!(QueryCategory::of("whole Tatooine"), QueryCategory::Unknown);
    }

    #[test]
    fn test_summarize_fixture_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = QueryLog::new(dir.path().join("queries.jsonl"));
        for entry in [
            logged("Who trained Luke?", "answered", "Yoda trained Luke.", &["Yoda"]),
            logged("Who is Leia?", "answered", "Leia led the Rebellion.", &["Leia Organa", "Yoda"]),
            logged("Who is Jar Jar?", "no_relevant_knowledge", "I have no information.", &[]),
            logged("Where is Dagobah?", "generation_failed", "", &["Yoda"]),
        ] {
            log.append(&entry).unwrap();
        }
        // Malformed lines are skipped, not fatal.
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(log.path())
            .unwrap();
        writeln!(file, "{{not json").unwrap();

        let report = QueryLogReport::summarize(&log.read_all().unwrap());
        assert_eq!(report.total_queries, 4);
        assert_eq!(report.successful_queries, 2);
        assert_eq!(report.failed_queries, 2);
        assert!((report.success_rate - 50.0).abs() < 1e-9);
        let expected_length = (18 + 23 + 22) as f64 / 4.0;
        assert!((report.average_answer_length - expected_length).abs() < 1e-9);

        assert_eq!(report.failed_by_category[&QueryCategory::Person], 1);
        assert_eq!(report.failed_by_category[&QueryCategory::Place], 1);
        assert_eq!(report.failed_examples.len(), 2);
        assert_eq!(report.failed_examples[0].query, "Who is Jar Jar?");

        assert_eq!(report.top_sources[0].title, "Yoda");
        assert_eq!(report.top_sources[0].count, 3);
        assert_eq!(report.top_sources[1].title, "Leia Organa");

        assert_eq!(report.irrelevant_sources_count, 1);
        assert_eq!(report.irrelevant_examples[0].query, "Where is Dagobah?");
        assert_eq!(report.irrelevant_examples[0].sources, vec!["Yoda".to_string()]);
        assert_eq!(report.weakest_category(), Some(QueryCategory::Person));
    }

    #[test]
    fn test_summarize_empty_log() {
        let report = QueryLogReport::summarize(&[]);
        assert_eq!(report.total_queries, 0);
        assert_eq!(report.success_rate, 0.0);
        assert!(report.top_sources.is_empty());
        assert_eq!(report.weakest_category(), None);
    }
}
