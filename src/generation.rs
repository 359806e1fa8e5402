//! Generation providers.
//!
//! - **[`OpenAICompatGenerator`]**: any OpenAI-compatible `/chat/completions`
//!   endpoint. The default deployment points it at Groq
//!   (`https://api.groq.com/openai/v1`, key in `GROQ_API_KEY`).
//! - **[`OllamaGenerator`]**: a local Ollama instance's `/api/chat`.
//!
//! Both retry rate limits, server errors and network failures; any other
//! failure is returned as an error, never as substitute text.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use guideline_rag_core::generation::{CompletionRequest, Generator};
use guideline_rag_core::{RagError, RagResult};

use crate::config::GenerationConfig;
use crate::http;

const GROQ_DEFAULT_URL: &str = "https://api.groq.com/openai/v1";
const GROQ_DEFAULT_KEY_ENV: &str = "GROQ_API_KEY";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Create the generator named by `generation.provider`.
///
/// API keys are read here, once, so a missing credential fails at startup.
pub fn create_generator(config: &GenerationConfig) -> RagResult<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAICompatGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => Err(RagError::Config(format!(
            "Unknown generation provider: {}",
            other
        ))),
    }
}

fn read_key(var: &str) -> RagResult<String> {
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(RagError::Config(format!(
            "{} environment variable not set",
            var
        ))),
    }
}

fn chat_messages(request: &CompletionRequest) -> serde_json::Value {
    serde_json::json!([
        { "role": "system", "content": request.system },
        { "role": "user", "content": request.user },
    ])
}

// ============ OpenAI-compatible ============

pub struct OpenAICompatGenerator {
    model: String,
    url: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAICompatGenerator {
    pub fn new(config: &GenerationConfig) -> RagResult<Self> {
        let key_env = config
            .api_key_env
            .as_deref()
            .unwrap_or(GROQ_DEFAULT_KEY_ENV);
        let api_key = read_key(key_env)?;
        let base = config.url.as_deref().unwrap_or(GROQ_DEFAULT_URL);
        let client =
            http::client(config.timeout_secs).map_err(|e| RagError::Config(e.to_string()))?;

        Ok(Self {
            model: config.model.clone(),
            url: format!("{}/chat/completions", base.trim_end_matches('/')),
            api_key,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl Generator for OpenAICompatGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": chat_messages(request),
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        let json = http::post_json(
            &self.client,
            &self.url,
            Some(&self.api_key),
            &body,
            self.max_retries,
            "Chat completions",
        )
        .await?;
        parse_chat_completion(&json)
    }
}

fn parse_chat_completion(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid chat completion response: missing content"))
}

// ============ Ollama ============

pub struct OllamaGenerator {
    model: String,
    url: String,
    api_key: Option<String>,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> RagResult<Self> {
        let api_key = config.api_key_env.as_deref().map(read_key).transpose()?;
        let base = config.url.as_deref().unwrap_or(OLLAMA_DEFAULT_URL);
        let client =
            http::client(config.timeout_secs).map_err(|e| RagError::Config(e.to_string()))?;

        Ok(Self {
            model: config.model.clone(),
            url: format!("{}/api/chat", base.trim_end_matches('/')),
            api_key,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": chat_messages(request),
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            },
        });
        let json = http::post_json(
            &self.client,
            &self.url,
            self.api_key.as_deref(),
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;
        json.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama chat response: missing message"))
    }
}
