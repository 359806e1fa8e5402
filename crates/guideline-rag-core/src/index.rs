//! Flat nearest-neighbor index over chunk embeddings.
//!
//! Vectors are kept in one contiguous row-major buffer and searched
//! exhaustively with squared Euclidean distance, so results are exact and
//! deterministic. Ties are broken by insertion order.
//!
//! An index always holds at least one vector: constructing one from an
//! empty chunk list fails with [`RagError::EmptyCorpus`].

use crate::embedding::{blob_to_vec, squared_l2, vec_to_blob};
use crate::error::{RagError, RagResult};
use crate::models::{Chunk, RetrievalPair};

#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dims: usize,
    chunks: Vec<Chunk>,
    /// `chunks.len() * dims` values, row `i` belongs to `chunks[i]`.
    data: Vec<f32>,
}

impl VectorIndex {
    /// Build from chunks and their embeddings (same order, same length).
    pub fn build(chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> RagResult<Self> {
        if chunks.is_empty() {
            return Err(RagError::EmptyCorpus);
        }
        if chunks.len() != vectors.len() {
            return Err(RagError::Embedding(format!(
                "got {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }
        let dims = vectors[0].len();
        if dims == 0 {
            return Err(RagError::Embedding("embedding has zero dimensions".into()));
        }

        let mut data = Vec::with_capacity(chunks.len() * dims);
        for (i, v) in vectors.iter().enumerate() {
            if v.len() != dims {
                return Err(RagError::Embedding(format!(
                    "vector {} has {} dims, expected {}",
                    i,
                    v.len(),
                    dims
                )));
            }
            data.extend_from_slice(v);
        }

        Ok(Self { dims, chunks, data })
    }

    /// Rebuild from the serialized form produced by [`VectorIndex::to_blob`].
    pub fn from_blob(chunks: Vec<Chunk>, dims: usize, blob: &[u8]) -> RagResult<Self> {
        if chunks.is_empty() {
            return Err(RagError::IndexCorrupt("index holds no chunks".into()));
        }
        if dims == 0 || blob.len() != chunks.len() * dims * 4 {
            return Err(RagError::IndexCorrupt(format!(
                "vector data is {} bytes, expected {} ({} chunks × {} dims)",
                blob.len(),
                chunks.len() * dims * 4,
                chunks.len(),
                dims
            )));
        }
        Ok(Self {
            dims,
            chunks,
            data: blob_to_vec(blob),
        })
    }

    pub fn to_blob(&self) -> Vec<u8> {
        vec_to_blob(&self.data)
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Always false for a constructed index; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Return the `k` nearest chunks, ascending by distance.
    ///
    /// Returns every chunk when the index holds fewer than `k`.
    pub fn search(&self, query: &[f32], k: usize) -> RagResult<Vec<RetrievalPair>> {
        if k == 0 {
            return Err(RagError::InvalidArgument("k must be >= 1".into()));
        }
        if query.len() != self.dims {
            return Err(RagError::Embedding(format!(
                "query has {} dims, index has {}",
                query.len(),
                self.dims
            )));
        }

        let mut scored: Vec<(usize, f32)> = self
            .data
            .chunks_exact(self.dims)
            .enumerate()
            .map(|(i, row)| (i, squared_l2(query, row)))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, distance)| RetrievalPair {
                chunk: self.chunks[i].clone(),
                distance,
            })
            .collect())
    }
}
