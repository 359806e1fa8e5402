//! The answering engine.
//!
//! [`Engine::answer`] runs one question end to end:
//!
//! 1. make the index READY (load, or build from the corpus);
//! 2. retrieve the `top_k` nearest chunks and classify coverage;
//! 3. on `NONE`, return [`STRICT_FALLBACK`] without calling the model;
//! 4. generate a two-section answer from the excerpts;
//! 5. reject it unless its evidence is quoted verbatim from the excerpts;
//! 6. wrap it in the risk notice and disclaimer, then close with the
//!    source citations.
//!
//! Index unavailability and rejected evidence become answer text. Every
//! other failure is returned as a [`RagError`].

use std::sync::Arc;

use guideline_rag_core::citation::sources_block;
use guideline_rag_core::coverage::{classify_pairs, CoverageThresholds};
use guideline_rag_core::embedding::Embedder;
use guideline_rag_core::evidence::{
    lacks_blockquote, normalize_text, EvidenceCheck, EvidenceReason, EvidenceValidator,
    STRICT_FALLBACK,
};
use guideline_rag_core::generation::Generator;
use guideline_rag_core::guardrail::{classify_risk, wrap, RiskLevel};
use guideline_rag_core::models::{Coverage, RetrievalPair};
use guideline_rag_core::prompt::excerpts_blob;
use guideline_rag_core::{RagError, RagResult};
use serde::Serialize;

use crate::config::{Config, ValidationMode};
use crate::embedding::create_embedder;
use crate::generation::create_generator;
use crate::index_store::IndexStore;
use crate::synth::AnswerSynthesizer;

/// Returned when the corpus yields no usable index.
pub const INDEX_UNAVAILABLE: &str = "⚠️ **Guideline index unavailable**\n\n\
Either the corpus directory holds no supported documents, or none of them yielded extractable text.\n\n\
Add readable PDF, PPTX, DOCX, TXT or Markdown guidelines to the corpus directory and ask again.";

/// The engine's reply to one question.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub coverage: Coverage,
    pub pairs: Vec<RetrievalPair>,
    pub risk: RiskLevel,
    /// Set whenever a generated answer was validated.
    pub evidence: Option<EvidenceCheck>,
}

/// One retrieved excerpt as exposed by the query API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Retrieved {
    pub source: String,
    pub page: Option<u32>,
    pub score: f32,
}

impl Answer {
    pub fn retrieved(&self) -> Vec<Retrieved> {
        self.pairs
            .iter()
            .map(|p| Retrieved {
                source: p.chunk.source.clone(),
                page: p.chunk.page,
                score: p.distance,
            })
            .collect()
    }

    fn unavailable(risk: RiskLevel) -> Self {
        Self {
            text: INDEX_UNAVAILABLE.to_string(),
            coverage: Coverage::None,
            pairs: Vec::new(),
            risk,
            evidence: None,
        }
    }
}

pub struct Engine {
    store: IndexStore,
    synth: AnswerSynthesizer,
    validator: EvidenceValidator,
    mode: ValidationMode,
    top_k: usize,
    thresholds: CoverageThresholds,
}

impl Engine {
    /// Build the engine and its providers from configuration.
    ///
    /// Missing credentials fail here, not on the first question.
    pub fn from_config(config: &Config) -> RagResult<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        Self::new(config, embedder, generator)
    }

    pub fn new(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> RagResult<Self> {
        if config.retrieval.top_k == 0 {
            return Err(RagError::Config("retrieval.top_k must be >= 1".into()));
        }
        let thresholds = CoverageThresholds::new(
            config.retrieval.clear_threshold,
            config.retrieval.partial_threshold,
        )?;

        Ok(Self {
            store: IndexStore::from_config(config, embedder),
            synth: AnswerSynthesizer::new(generator, &config.generation),
            validator: config.validation.validator(),
            mode: config.validation.mode,
            top_k: config.retrieval.top_k,
            thresholds,
        })
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    /// Answer `query`. `language` is the caller's preferred reply language
    /// code, used only when the question's own language is unclear.
    pub async fn answer(&self, query: &str, language: &str) -> RagResult<Answer> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::InvalidArgument("query must not be empty".into()));
        }
        let risk = classify_risk(query);

        let Some(handle) = self.store.ensure_ready().await? else {
            return Ok(Answer::unavailable(risk));
        };

        let pairs = self.store.search(&handle, query, self.top_k).await?;
        let coverage = classify_pairs(&pairs, self.thresholds);
        tracing::debug!(
            best = pairs.first().map(|p| p.distance),
            retrieved = pairs.len(),
            %coverage,
            "retrieval"
        );

        if coverage == Coverage::None {
            return Ok(Answer {
                text: STRICT_FALLBACK.to_string(),
                coverage,
                pairs,
                risk,
                evidence: None,
            });
        }

        let raw = self.synth.generate(query, language, &pairs).await?;
        let check = self.check(&raw, &pairs);
        tracing::debug!(reason = check.reason.as_str(), ok = check.ok, "evidence check");

        let text = if !check.ok {
            tracing::warn!(reason = check.reason.as_str(), "answer rejected, returning fallback");
            STRICT_FALLBACK.to_string()
        } else if check.reason == EvidenceReason::FallbackOk {
            STRICT_FALLBACK.to_string()
        } else {
            let mut text = wrap(risk, raw.trim());
            text.push_str(&sources_block(&pairs));
            text
        };

        Ok(Answer {
            text,
            coverage,
            pairs,
            risk,
            evidence: Some(check),
        })
    }

    /// Blockquote guard, then (in full mode) the evidence validator.
    fn check(&self, raw: &str, pairs: &[RetrievalPair]) -> EvidenceCheck {
        if lacks_blockquote(raw) {
            return EvidenceCheck {
                ok: false,
                reason: EvidenceReason::MissingBlockquote,
            };
        }
        match self.mode {
            ValidationMode::Full => self.validator.validate(raw, &excerpts_blob(pairs)),
            ValidationMode::Lean => lean_check(raw),
        }
    }
}

fn lean_check(raw: &str) -> EvidenceCheck {
    let (ok, reason) = if raw.trim().is_empty() {
        (false, EvidenceReason::EmptyAnswer)
    } else if normalize_text(raw) == STRICT_FALLBACK {
        (true, EvidenceReason::FallbackOk)
    } else {
        (true, EvidenceReason::EvidenceOk)
    };
    EvidenceCheck { ok, reason }
}
