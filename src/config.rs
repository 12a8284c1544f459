//! TOML configuration for context-chat.
//!
//! A single file describes where documents are dropped, where the vector
//! index and the persisted summary live, how passages are cut, and which
//! embedding and language-model providers to talk to.
//!
//! ```toml
//! [store]
//! path = "./data/index"
//!
//! [sources]
//! root = "./inbox"
//!
//! [memory]
//! summary_path = "./data/summary.txt"
//!
//! [embedding]
//! provider = "gemini"
//! model = "text-embedding-004"
//! dims = 768
//!
//! [llm]
//! provider = "gemini"
//! credential_envs = ["GOOGLE_API_KEY", "GOOGLE_API_KEY_2"]
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::Credential;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    pub sources: SourcesConfig,
    pub memory: MemoryConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

/// Location of the persisted vector index (a directory, created on demand).
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourcesConfig {
    /// Drop zone scanned (non-recursively) on every ingestion run.
    pub root: PathBuf,
    /// Subfolder of `root` that receives archived sources.
    #[serde(default = "default_archive_dir")]
    pub archive_dir: String,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
}

fn default_archive_dir() -> String {
    "processed".to_string()
}

fn default_include_globs() -> Vec<String> {
    vec![
        "*.txt".to_string(),
        "*.md".to_string(),
        "*.pdf".to_string(),
        "*.docx".to_string(),
    ]
}

impl SourcesConfig {
    pub fn archive_path(&self) -> PathBuf {
        self.root.join(&self.archive_dir)
    }
}

/// Passage size and overlap, both in characters.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Passages fed into each answer prompt.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Default result count for the `search` command.
    #[serde(default = "default_search_k")]
    pub search_k: usize,
}

fn default_top_k() -> usize {
    4
}
fn default_search_k() -> usize {
    10
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            search_k: default_search_k(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama host, OpenAI-compatible gateway, ...).
    #[serde(default)]
    pub url: Option<String>,
    /// Environment variable holding the API key for remote providers.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            api_key_env: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_embedding_timeout() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_remote(&self) -> bool {
        matches!(self.provider.as_str(), "openai" | "ollama" | "gemini")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: usize,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub url: Option<String>,
    /// Environment variables that each hold one interchangeable API key.
    #[serde(default = "default_credential_envs")]
    pub credential_envs: Vec<String>,
    /// Full passes over the credential pool before giving up.
    #[serde(default = "default_max_rotations")]
    pub max_rotations: u32,
    /// Pause between two full rotations, doubled after each one.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default)]
    pub persona: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            timeout_secs: default_llm_timeout(),
            url: None,
            credential_envs: default_credential_envs(),
            max_rotations: default_max_rotations(),
            backoff_ms: default_backoff_ms(),
            persona: None,
        }
    }
}

fn default_llm_provider() -> String {
    "gemini".to_string()
}
fn default_llm_model() -> String {
    "gemini-3-flash-preview".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_output_tokens() -> usize {
    2048
}
fn default_llm_timeout() -> u64 {
    60
}
fn default_credential_envs() -> Vec<String> {
    vec!["GOOGLE_API_KEY".to_string()]
}
fn default_max_rotations() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    pub summary_path: PathBuf,
    /// Number of recent turns replayed into each prompt.
    #[serde(default = "default_window")]
    pub window: usize,
    #[serde(default = "default_summary_max_words")]
    pub summary_max_words: usize,
}

fn default_window() -> usize {
    6
}
fn default_summary_max_words() -> usize {
    150
}

impl Config {
    /// Builds a config with every path placed under `root` and defaults
    /// elsewhere. Used by tests and by callers that embed the engine.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            store: StoreConfig {
                path: root.join("data").join("index"),
            },
            sources: SourcesConfig {
                root: root.join("inbox"),
                archive_dir: default_archive_dir(),
                include_globs: default_include_globs(),
            },
            memory: MemoryConfig {
                summary_path: root.join("data").join("summary.txt"),
                window: default_window(),
                summary_max_words: default_summary_max_words(),
            },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parses and validates a TOML config document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        bail!(
            "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.chunk_overlap,
            config.chunking.chunk_size
        );
    }

    if config.retrieval.top_k < 1 || config.retrieval.search_k < 1 {
        bail!("retrieval.top_k and retrieval.search_k must be >= 1");
    }

    if config.memory.window < 1 {
        bail!("memory.window must be >= 1");
    }

    if config.sources.archive_dir.trim().is_empty() {
        bail!("sources.archive_dir must not be empty");
    }

    match config.embedding.provider.as_str() {
        "hash" | "openai" | "ollama" | "gemini" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be hash, openai, ollama, gemini, or local.",
            other
        ),
    }
    if config.embedding.is_remote() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    match config.llm.provider.as_str() {
        "gemini" | "anthropic" | "openai" => {}
        other => bail!(
            "Unknown llm provider: '{}'. Must be gemini, anthropic, or openai.",
            other
        ),
    }
    if config.llm.max_rotations < 1 {
        bail!("llm.max_rotations must be >= 1");
    }
    if config.llm.credential_envs.is_empty() {
        bail!("llm.credential_envs must list at least one environment variable");
    }

    Ok(())
}

/// Assembles the credential pool from the environment.
///
/// Variables that are unset or blank are skipped; duplicates of an
/// already-collected secret are dropped so the pool only holds distinct keys.
pub fn load_credentials(llm: &LlmConfig) -> Result<Vec<Credential>> {
    let mut pool: Vec<Credential> = Vec::new();
    for var in &llm.credential_envs {
        let secret = match std::env::var(var) {
            Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => continue,
        };
        if pool.iter().any(|c| c.secret == secret) {
            continue;
        }
        pool.push(Credential::new(var.clone(), secret));
    }

    if pool.is_empty() {
        bail!(
            "No LLM credentials found. Set at least one of: {}",
            llm.credential_envs.join(", ")
        );
    }
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[store]
path = "/tmp/cc/index"

[sources]
root = "/tmp/cc/inbox"

[memory]
summary_path = "/tmp/cc/summary.txt"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = parse_config(MINIMAL).unwrap();
        assert_eq!(cfg.chunking.chunk_size, 1000);
        assert_eq!(cfg.chunking.chunk_overlap, 200);
        assert_eq!(cfg.embedding.provider, "hash");
        assert_eq!(cfg.llm.provider, "gemini");
        assert!((cfg.llm.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(cfg.sources.archive_path(), PathBuf::from("/tmp/cc/inbox/processed"));
    }

    #[test]
    fn test_example_config_parses() {
        let cfg = parse_config(include_str!("../config/chat.example.toml")).unwrap();
        assert_eq!(cfg.llm.credential_envs.len(), 3);
        assert_eq!(cfg.embedding.dims, Some(256));
        assert_eq!(cfg.retrieval.top_k, 4);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let content = format!("{}\n[chunking]\nchunk_size = 100\nchunk_overlap = 100\n", MINIMAL);
        let err = parse_config(&content).unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn test_remote_embedding_requires_dims() {
        let content = format!(
            "{}\n[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\n",
            MINIMAL
        );
        let err = parse_config(&content).unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn test_unknown_llm_provider_rejected() {
        let content = format!("{}\n[llm]\nprovider = \"parrot\"\n", MINIMAL);
        assert!(parse_config(&content).is_err());
    }

    #[test]
    fn test_load_credentials_skips_missing_and_duplicates() {
        std::env::set_var("CC_TEST_KEY_A", "secret-a");
        std::env::set_var("CC_TEST_KEY_B", "secret-a");
        std::env::set_var("CC_TEST_KEY_C", "secret-c");
        let llm = LlmConfig {
            credential_envs: vec![
                "CC_TEST_KEY_A".to_string(),
                "CC_TEST_KEY_MISSING".to_string(),
                "CC_TEST_KEY_B".to_string(),
                "CC_TEST_KEY_C".to_string(),
            ],
            ..LlmConfig::default()
        };
        let pool = load_credentials(&llm).unwrap();
        let labels: Vec<&str> = pool.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["CC_TEST_KEY_A", "CC_TEST_KEY_C"]);
    }

    #[test]
    fn test_load_credentials_empty_pool_is_error() {
        let llm = LlmConfig {
            credential_envs: vec!["CC_TEST_NEVER_SET".to_string()],
            ..LlmConfig::default()
        };
        assert!(load_credentials(&llm).is_err());
    }
}
