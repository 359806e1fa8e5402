//! Generation trait.
//!
//! The generation model is an external collaborator reached through this
//! narrow interface. Concrete providers live in the app crate.

use anyhow::Result;
use async_trait::async_trait;

/// One chat-style completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// A text generation model.
///
/// Implementations report transport and provider failures (quota,
/// network, malformed responses) as errors; they never substitute text.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Model identifier sent to the provider.
    fn model_name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}
