//! Ingestion: extract every scanned document and chunk it.
//!
//! A document that cannot be read or parsed is skipped with a warning; the
//! remaining corpus is still ingested. Whether the result is usable is the
//! index store's decision (an empty chunk list means an empty corpus).

use guideline_rag_core::chunk::chunk_pages;
use guideline_rag_core::models::{Chunk, SourceDocument};

use crate::config::{ChunkingConfig, CorpusConfig};
use crate::extract;

/// Outcome of one ingestion pass.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub chunks: Vec<Chunk>,
    /// Documents that produced at least one chunk.
    pub documents_indexed: usize,
    /// `(document name, reason)` for every skipped document.
    pub skipped: Vec<(String, String)>,
}

/// Extract and chunk `documents`, in order.
///
/// Blocking: run it on a blocking thread from async code.
pub fn ingest_documents(
    corpus: &CorpusConfig,
    chunking: &ChunkingConfig,
    documents: &[SourceDocument],
) -> IngestReport {
    let mut report = IngestReport::default();

    for doc in documents {
        let path = corpus.dir.join(&doc.name);
        let pages = match extract::extract_file(&path, corpus.max_file_bytes) {
            Ok(pages) => pages,
            Err(e) => {
                tracing::warn!(document = %doc.name, error = %e, "skipping document");
                report.skipped.push((doc.name.clone(), e.to_string()));
                continue;
            }
        };

        let chunks = chunk_pages(&doc.name, &pages, chunking.chunk_size, chunking.chunk_overlap);
        if chunks.is_empty() {
            tracing::warn!(document = %doc.name, "no extractable text, skipping document");
            report
                .skipped
                .push((doc.name.clone(), "no extractable text".to_string()));
            continue;
        }

        tracing::debug!(document = %doc.name, units = pages.len(), chunks = chunks.len(), "ingested");
        report.documents_indexed += 1;
        report.chunks.extend(chunks);
    }

    report
}
