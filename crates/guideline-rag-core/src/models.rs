//! Core data types that flow through ingestion, retrieval, and answering.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A file discovered in the corpus directory.
///
/// Only its metadata is kept; it exists to fingerprint the corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocument {
    /// Path relative to the corpus root, `/`-separated.
    pub name: String,
    pub size: u64,
    /// Modification time in whole seconds since the Unix epoch.
    pub mtime: i64,
}

/// One extracted unit of a document: a PDF page, a slide, or a whole file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub text: String,
    /// 1-based page or slide number; `None` for formats without pages.
    pub page: Option<u32>,
}

impl PageText {
    pub fn new(text: impl Into<String>, page: Option<u32>) -> Self {
        Self {
            text: text.into(),
            page,
        }
    }
}

/// A bounded span of source text indexed as one retrievable unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic UUID derived from source, page, and position.
    pub id: String,
    /// Source document name (relative path inside the corpus).
    pub source: String,
    pub page: Option<u32>,
    /// Position of this chunk within its source document, starting at 0.
    pub chunk_index: usize,
    pub text: String,
    /// SHA-256 of `text`, hex-encoded.
    pub hash: String,
}

impl Chunk {
    /// File name of the source without any directory prefix.
    pub fn source_name(&self) -> &str {
        self.source.rsplit('/').next().unwrap_or(&self.source)
    }
}

/// A retrieved chunk with its distance to the query.
///
/// Distances are squared Euclidean (lower = more similar).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalPair {
    pub chunk: Chunk,
    pub distance: f32,
}

/// How well the corpus covers a query, derived from the best distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Coverage {
    Clear,
    Partial,
    None,
}

impl Coverage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Coverage::Clear => "CLEAR",
            Coverage::Partial => "PARTIAL",
            Coverage::None => "NONE",
        }
    }
}

impl fmt::Display for Coverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
