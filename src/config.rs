use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub corpus: CorpusConfig,
    pub index: IndexConfig,
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub query_log: QueryLogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["*.txt".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    pub path: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_add_batch_size")]
    pub add_batch_size: usize,
}

fn default_collection() -> String {
    "knowledge_base".to_string()
}
fn default_add_batch_size() -> usize {
    256
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_embed_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama or OpenAI-compatible endpoint.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            batch_size: default_embed_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_embed_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Maximum cosine distance for a hit to count as relevant.
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            relevance_threshold: default_relevance_threshold(),
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_relevance_threshold() -> f32 {
    0.8
}

/// What the security filter does with chunks that mention credentials,
/// secrets, or tokens.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SensitiveAction {
    /// Record the match, leave the chunk alone.
    #[default]
    Observe,
    Scrub,
    Drop,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecurityConfig {
    #[serde(default = "default_true")]
    pub enable_protection: bool,
    #[serde(default)]
    pub sensitive_action: SensitiveAction,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_protection: true,
            sensitive_action: SensitiveAction::Observe,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_retries: default_generation_retries(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_generation_retries() -> u32 {
    3
}
fn default_generation_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ReportConfig {
    /// Directory for `update_result_*.json` run summaries. Unset disables them.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct QueryLogConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!(
            "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.chunk_overlap,
            config.chunking.chunk_size
        );
    }

    if config.index.add_batch_size == 0 {
        anyhow::bail!("index.add_batch_size must be > 0");
    }
    if config.index.collection.trim().is_empty() {
        anyhow::bail!("index.collection must not be empty");
    }

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if !(config.retrieval.relevance_threshold >= 0.0) {
        anyhow::bail!("retrieval.relevance_threshold must be >= 0.0");
    }

    // Validate embedding
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    match config.embedding.provider.as_str() {
        "disabled" | "local" => {}
        "openai" | "ollama" | "hashed" => {
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                anyhow::bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, local, or hashed.",
            other
        ),
    }
    if matches!(config.embedding.provider.as_str(), "openai" | "ollama")
        && config.embedding.model.is_none()
    {
        anyhow::bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }

    // Validate generation
    match config.generation.provider.as_str() {
        "disabled" => {}
        "openai" | "ollama" => {
            if config.generation.model.is_none() {
                anyhow::bail!(
                    "generation.model must be specified when provider is '{}'",
                    config.generation.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[corpus]
root = "/tmp/kb"

[index]
path = "/tmp/kb.sqlite"

[ledger]
path = "/tmp/update_state.json"
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.retrieval.top_k, 3);
        assert!((config.retrieval.relevance_threshold - 0.8).abs() < f32::EPSILON);
        assert!(config.security.enable_protection);
        assert_eq!(config.security.sensitive_action, SensitiveAction::Observe);
        assert_eq!(config.index.collection, "knowledge_base");
        assert_eq!(config.corpus.include_globs, vec!["*.txt".to_string()]);
        assert!(!config.embedding.is_enabled());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let text = format!("{MINIMAL}\n[chunking]\nchunk_size = 100\nchunk_overlap = 100\n");
        let config: Config = toml::from_str(&text).unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn test_network_provider_requires_model_and_dims() {
        let text = format!("{MINIMAL}\n[embedding]\nprovider = \"openai\"\ndims = 1536\n");
        let config: Config = toml::from_str(&text).unwrap();
        assert!(validate(&config).is_err());

        let text = format!(
            "{MINIMAL}\n[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\n"
        );
        let config: Config = toml::from_str(&text).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let text = format!("{MINIMAL}\n[embedding]\nprovider = \"magic\"\n");
        let config: Config = toml::from_str(&text).unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_sensitive_action_parses() {
        let text = format!(
            "{MINIMAL}\n[security]\nenable_protection = false\nsensitive_action = \"scrub\"\n"
        );
        let config: Config = toml::from_str(&text).unwrap();
        assert!(!config.security.enable_protection);
        assert_eq!(config.security.sensitive_action, SensitiveAction::Scrub);
    }

    #[test]
    fn test_example_config_is_valid() {
        let text = include_str!("../config/kbs.example.toml");
        let config: Config = toml::from_str(text).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.embedding.provider, "local");
        assert_eq!(config.retrieval.relevance_threshold, 0.8);
    }
}
