//! Embedding providers.
//!
//! Concrete implementations of the core [`Embedder`] trait:
//! - **[`OpenAIEmbedder`]**: `POST /v1/embeddings`, batched, with retry and backoff.
//! - **[`OllamaEmbedder`]**: a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalEmbedder`**: fastembed on-device inference; no network calls after
//!   the model download. Requires the `local-embeddings-fastembed` feature.
//! - **[`HashEmbedder`]**: deterministic feature hashing, for offline smoke
//!   tests and air-gapped demos. Retrieval quality is lexical at best.
//!
//! Use [`create_embedder`] to pick one from configuration.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use guideline_rag_core::embedding::{normalize, Embedder};
use guideline_rag_core::{RagError, RagResult};
use sha2::{Digest, Sha256};

use crate::config::EmbeddingConfig;
use crate::http;

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";
const HASH_DEFAULT_DIMS: usize = 384;

/// Create the embedder named by `embedding.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"openai"` | [`OpenAIEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"local"` | `LocalEmbedder` (fastembed feature) |
/// | `"hash"` | [`HashEmbedder`] |
///
/// # Errors
///
/// [`RagError::Config`] for unknown providers, a missing API key, or a
/// missing feature flag.
pub fn create_embedder(config: &EmbeddingConfig) -> RagResult<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => Err(RagError::Config(
            "Local embedding provider requires --features local-embeddings-fastembed".into(),
        )),
        "hash" => Ok(Arc::new(HashEmbedder::new(
            &config.model,
            config.dims.unwrap_or(HASH_DEFAULT_DIMS),
        ))),
        other => Err(RagError::Config(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

fn required_dims(config: &EmbeddingConfig) -> RagResult<usize> {
    match config.dims {
        Some(d) if d > 0 => Ok(d),
        _ => Err(RagError::Config(format!(
            "embedding.dims required for provider '{}'",
            config.provider
        ))),
    }
}

fn parse_vector(value: &serde_json::Value) -> Result<Vec<f32>> {
    Ok(value
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("embedding is not an array"))?
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

fn check_count(got: usize, expected: usize, service: &str) -> Result<()> {
    if got != expected {
        anyhow::bail!(
            "{} returned {} embeddings for {} inputs",
            service,
            got,
            expected
        );
    }
    Ok(())
}

// ============ OpenAI ============

/// Calls the OpenAI embeddings API. Requires `OPENAI_API_KEY`.
pub struct OpenAIEmbedder {
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    batch_size: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> RagResult<Self> {
        let dims = required_dims(config)?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| RagError::Config("OPENAI_API_KEY environment variable not set".into()))?;
        let client =
            http::client(config.timeout_secs).map_err(|e| RagError::Config(e.to_string()))?;

        Ok(Self {
            model: config.model.clone(),
            dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_EMBEDDINGS_URL.to_string()),
            api_key,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let body = serde_json::json!({ "model": self.model, "input": batch });
            let json = http::post_json(
                &self.client,
                &self.url,
                Some(&self.api_key),
                &body,
                self.max_retries,
                "OpenAI",
            )
            .await?;
            let vectors = parse_openai_response(&json)?;
            check_count(vectors.len(), batch.len(), "OpenAI")?;
            out.extend(vectors);
        }
        Ok(out)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        indexed.push((index, parse_vector(embedding)?));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

/// Calls `POST /api/embed` on an Ollama instance (default `http://localhost:11434`).
pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    url: String,
    batch_size: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> RagResult<Self> {
        let dims = required_dims(config)?;
        let client =
            http::client(config.timeout_secs).map_err(|e| RagError::Config(e.to_string()))?;
        let base = config.url.as_deref().unwrap_or(OLLAMA_DEFAULT_URL);

        Ok(Self {
            model: config.model.clone(),
            dims,
            url: format!("{}/api/embed", base.trim_end_matches('/')),
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let body = serde_json::json!({ "model": self.model, "input": batch });
            let json = http::post_json(
                &self.client,
                &self.url,
                None,
                &body,
                self.max_retries,
                "Ollama",
            )
            .await?;
            let vectors = parse_ollama_response(&json)?;
            check_count(vectors.len(), batch.len(), "Ollama")?;
            out.extend(vectors);
        }
        Ok(out)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?
        .iter()
        .map(parse_vector)
        .collect()
}

// ============ Local (fastembed) ============

/// Runs a sentence-embedding model on-device.
///
/// The model is downloaded from Hugging Face on first use and loaded once;
/// later calls reuse it.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
    batch_size: usize,
    kind: fastembed::EmbeddingModel,
    model: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> RagResult<Self> {
        let model_name = canonical_local_model(&config.model);
        let (kind, native_dims) = fastembed_model(&model_name)?;
        let dims = config.dims.unwrap_or(native_dims);
        if dims != native_dims {
            return Err(RagError::Config(format!(
                "embedding.dims is {} but {} produces {} dimensions",
                dims, model_name, native_dims
            )));
        }
        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size.max(1),
            kind,
            model: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

/// Lowercase, without a `sentence-transformers/` style owner prefix.
#[cfg_attr(not(feature = "local-embeddings-fastembed"), allow(dead_code))]
fn canonical_local_model(name: &str) -> String {
    let name = name.trim().to_lowercase();
    match name.rsplit_once('/') {
        Some((_, model)) => model.to_string(),
        None => name,
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn fastembed_model(name: &str) -> RagResult<(fastembed::EmbeddingModel, usize)> {
    use fastembed::EmbeddingModel as M;
    match name {
        "all-minilm-l6-v2" => Ok((M::AllMiniLML6V2, 384)),
        "bge-small-en-v1.5" => Ok((M::BGESmallENV15, 384)),
        "bge-base-en-v1.5" => Ok((M::BGEBaseENV15, 768)),
        "bge-large-en-v1.5" => Ok((M::BGELargeENV15, 1024)),
        "multilingual-e5-small" => Ok((M::MultilingualE5Small, 384)),
        "multilingual-e5-base" => Ok((M::MultilingualE5Base, 768)),
        "multilingual-e5-large" => Ok((M::MultilingualE5Large, 1024)),
        other => Err(RagError::Config(format!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ))),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let slot = Arc::clone(&self.model);
        let kind = self.kind.clone();
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut guard = slot
                .lock()
                .map_err(|_| anyhow::anyhow!("local embedding model lock poisoned"))?;
            if guard.is_none() {
                tracing::info!("loading local embedding model");
                let model = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(kind).with_show_download_progress(false),
                )
                .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;
                *guard = Some(model);
            }
            let model = guard
                .as_mut()
                .ok_or_else(|| anyhow::anyhow!("local embedding model unavailable"))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
        })
        .await?
    }
}

// ============ Hash ============

/// Deterministic bag-of-words embedder.
///
/// Each lowercase word is hashed (SHA-256) to a bucket and a sign; the
/// resulting vector is L2-normalized. Identical texts map to identical
/// vectors and texts sharing many words land close together.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    model: String,
    dims: usize,
}

impl HashEmbedder {
    pub fn new(model: &str, dims: usize) -> Self {
        Self {
            model: model.to_string(),
            dims: dims.max(1),
        }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        let lowered = text.to_lowercase();
        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6],
                digest[7],
            ]) as usize
                % self.dims;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        normalize(&mut v);
        v
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}
