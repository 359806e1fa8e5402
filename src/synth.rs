//! Answer synthesis: prompt the generation model with retrieved excerpts.

use std::sync::Arc;
use std::time::Duration;

use guideline_rag_core::generation::{CompletionRequest, Generator};
use guideline_rag_core::models::RetrievalPair;
use guideline_rag_core::prompt::build_prompt;
use guideline_rag_core::{RagError, RagResult};

use crate::config::GenerationConfig;

pub struct AnswerSynthesizer {
    generator: Arc<dyn Generator>,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
}

impl AnswerSynthesizer {
    pub fn new(generator: Arc<dyn Generator>, config: &GenerationConfig) -> Self {
        Self {
            generator,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Produce a candidate answer in the two-section format.
    ///
    /// Provider errors become [`RagError::Generation`]; exceeding the
    /// timeout becomes [`RagError::GenerationTimeout`] and the call is
    /// dropped, so no partial answer survives.
    pub async fn generate(
        &self,
        question: &str,
        language: &str,
        pairs: &[RetrievalPair],
    ) -> RagResult<String> {
        let prompt = build_prompt(question, language, pairs);
        let request = CompletionRequest {
            system: prompt.system,
            user: prompt.user,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        match tokio::time::timeout(self.timeout, self.generator.complete(&request)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(RagError::Generation(format!("{:#}", e))),
            Err(_) => Err(RagError::GenerationTimeout(self.timeout)),
        }
    }
}
