//! TOML configuration.
//!
//! One file describes the corpus, the persisted index, chunking, retrieval
//! thresholds, both model providers, evidence validation and the HTTP
//! bind address. Everything is validated when the file is loaded, so a bad
//! value fails at startup instead of on the first question.
//!
//! ```toml
//! [corpus]
//! dir = "./guidelines"
//!
//! [index]
//! dir = "./data/index"
//!
//! [embedding]
//! provider = "local"
//! model = "all-minilm-l6-v2"
//!
//! [generation]
//! model = "llama-3.1-8b-instant"
//! ```

use anyhow::{bail, Context, Result};
use guideline_rag_core::coverage::CoverageThresholds;
use guideline_rag_core::evidence::{EvidenceValidator, MinQuoteLength, DEFAULT_INFERENCE_PHRASES};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub corpus: CorpusConfig,
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    pub dir: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

fn default_include_globs() -> Vec<String> {
    ["**/*.pdf", "**/*.pptx", "**/*.docx", "**/*.txt", "**/*.md"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_file_bytes() -> u64 {
    100 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    pub dir: PathBuf,
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
    900
}
fn default_chunk_overlap() -> usize {
    150
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_clear_threshold")]
    pub clear_threshold: f32,
    #[serde(default = "default_partial_threshold")]
    pub partial_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            clear_threshold: default_clear_threshold(),
            partial_threshold: default_partial_threshold(),
        }
    }
}

fn default_top_k() -> usize {
    6
}
fn default_clear_threshold() -> f32 {
    1.2
}
fn default_partial_threshold() -> f32 {
    2.2
}

impl RetrievalConfig {
    pub fn thresholds(&self) -> Result<CoverageThresholds> {
        Ok(CoverageThresholds::new(
            self.clear_threshold,
            self.partial_threshold,
        )?)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_retries() -> u32 {
    5
}
fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    pub model: String,
    /// Base URL. Defaults to Groq's OpenAI-compatible endpoint for `openai`
    /// and `http://localhost:11434` for `ollama`.
    #[serde(default)]
    pub url: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
}

fn default_generation_provider() -> String {
    "openai".to_string()
}
fn default_max_tokens() -> u32 {
    650
}
fn default_generation_timeout() -> u64 {
    60
}
fn default_generation_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// Blockquote guard, then the full evidence validator.
    #[default]
    Full,
    /// Blockquote guard only.
    Lean,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ValidationConfig {
    #[serde(default)]
    pub mode: ValidationMode,
    #[serde(default)]
    pub min_quote_chars: MinQuoteLength,
    #[serde(default = "default_inference_phrases")]
    pub inference_phrases: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            mode: ValidationMode::default(),
            min_quote_chars: MinQuoteLength::default(),
            inference_phrases: default_inference_phrases(),
        }
    }
}

fn default_inference_phrases() -> Vec<String> {
    DEFAULT_INFERENCE_PHRASES
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl ValidationConfig {
    pub fn validator(&self) -> EvidenceValidator {
        EvidenceValidator::new(&self.inference_phrases, self.min_quote_chars)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a configuration document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        bail!(
            "chunking.chunk_overlap ({}) must be below chunking.chunk_size ({})",
            config.chunking.chunk_overlap,
            config.chunking.chunk_size
        );
    }

    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    config
        .retrieval
        .thresholds()
        .with_context(|| "invalid retrieval thresholds")?;

    if config.embedding.model.trim().is_empty() {
        bail!("embedding.model must not be empty");
    }
    match config.embedding.provider.as_str() {
        "openai" | "ollama" => {
            if config.embedding.dims.unwrap_or(0) == 0 {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        "local" | "hash" => {
            if config.embedding.dims == Some(0) {
                bail!("embedding.dims must be > 0");
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be openai, ollama, local, or hash.",
            other
        ),
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    if config.generation.model.trim().is_empty() {
        bail!("generation.model must not be empty");
    }
    match config.generation.provider.as_str() {
        "openai" | "ollama" => {}
        other => bail!(
            "Unknown generation provider: '{}'. Must be openai or ollama.",
            other
        ),
    }
    if !config.generation.temperature.is_finite() || config.generation.temperature < 0.0 {
        bail!("generation.temperature must be a non-negative number");
    }
    if config.generation.max_tokens == 0 {
        bail!("generation.max_tokens must be > 0");
    }
    if config.generation.timeout_secs == 0 {
        bail!("generation.timeout_secs must be > 0");
    }

    let min = &config.validation.min_quote_chars;
    if min.alphabetic == 0 || min.logographic == 0 || min.right_to_left == 0 {
        bail!("validation.min_quote_chars values must be >= 1");
    }

    Ok(())
}
