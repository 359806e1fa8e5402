//! Error taxonomy shared by the core and app crates.

use std::time::Duration;

use thiserror::Error;

/// Failures that cross the engine boundary.
///
/// Evidence-validation failures are not errors here: a rejected answer
/// is a normal control path that produces the strict fallback text.
#[derive(Debug, Error)]
pub enum RagError {
    /// No source document produced any chunk of text.
    #[error("corpus has no usable text")]
    EmptyCorpus,
    /// Persisted index artifacts are missing, unreadable, or inconsistent.
    #[error("index is corrupt: {0}")]
    IndexCorrupt(String),
    #[error("embedding failed: {0}")]
    Embedding(String),
    /// The generation provider returned an error (quota, network, bad response).
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("generation timed out after {0:?}")]
    GenerationTimeout(Duration),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type RagResult<T> = Result<T, RagError>;
