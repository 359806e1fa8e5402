//! Persisted vector index with corpus-staleness tracking.
//!
//! # State machine
//!
//! ```text
//! EMPTY ──build──▶ BUILDING ──ok──▶ READY ──corpus changed──▶ STALE
//!   ▲                 │                                         │
//!   └──no chunks / ◀──┘             BUILDING ◀──────────────────┘
//!      error
//! ```
//!
//! Queries call [`IndexStore::ensure_ready`], which loads or builds as
//! needed. Builds are serialized by a lock; while one is in flight, other
//! queries keep using the previous handle if there is one, and a rebuild
//! requested meanwhile reuses the result of the in-flight build when the
//! corpus has not changed. A build that found no usable text is remembered
//! until the corpus changes.
//!
//! # On-disk layout
//!
//! | File | Content |
//! |------|---------|
//! | `vectors.bin` | little-endian `f32`, one row per chunk |
//! | `chunks.json` | chunk text and provenance, row order |
//! | `index.json` | [`IndexMeta`]: model, dims, counts, checksum |
//! | `manifest.json` | [`IndexManifest`] of the corpus at build time |
//!
//! A new index is written to `<dir>.staging` and renamed into place, so a
//! reader never observes a half-written directory.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use guideline_rag_core::embedding::Embedder;
use guideline_rag_core::index::VectorIndex;
use guideline_rag_core::models::{Chunk, RetrievalPair};
use guideline_rag_core::{RagError, RagResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::config::{ChunkingConfig, Config, CorpusConfig};
use crate::ingest::{ingest_documents, IngestReport};
use crate::manifest::{IndexManifest, MANIFEST_FILE};

pub const VECTORS_FILE: &str = "vectors.bin";
pub const CHUNKS_FILE: &str = "chunks.json";
pub const META_FILE: &str = "index.json";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreState {
    Empty,
    Building,
    Ready,
    Stale,
}

impl StoreState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreState::Empty => "empty",
            StoreState::Building => "building",
            StoreState::Ready => "ready",
            StoreState::Stale => "stale",
        }
    }
}

/// Metadata persisted as `index.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub format_version: u32,
    pub embedding_model: String,
    pub dims: usize,
    pub chunk_count: usize,
    /// Distinct source documents that contributed chunks.
    pub document_count: usize,
    pub built_at: DateTime<Utc>,
    /// SHA-256 over `vectors.bin` followed by `chunks.json`.
    pub checksum: String,
}

/// A loaded, searchable index together with the corpus it was built from.
#[derive(Debug)]
pub struct IndexHandle {
    pub index: VectorIndex,
    pub manifest: IndexManifest,
    pub meta: IndexMeta,
}

impl IndexHandle {
    pub fn chunk_count(&self) -> usize {
        self.index.len()
    }

    pub fn document_count(&self) -> usize {
        self.meta.document_count
    }

    /// Return `k` nearest chunks to an already-embedded query.
    pub fn search_vector(&self, query: &[f32], k: usize) -> RagResult<Vec<RetrievalPair>> {
        self.index.search(query, k)
    }
}

/// Outcome of a build or rebuild.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub state: StoreState,
    pub chunk_count: usize,
    pub document_count: usize,
    /// `(document, reason)` for documents skipped during ingestion.
    pub skipped: Vec<(String, String)>,
}

/// Snapshot for `grag status` and `GET /status`.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub state: StoreState,
    pub chunk_count: usize,
    pub document_count: usize,
    pub embedding_model: Option<String>,
    pub built_at: Option<DateTime<Utc>>,
    pub stale: bool,
}

fn serialize_index(index: &VectorIndex) -> RagResult<(Vec<u8>, Vec<u8>)> {
    let chunks = serde_json::to_vec_pretty(index.chunks())
        .map_err(|e| RagError::IndexCorrupt(format!("cannot serialize chunks: {}", e)))?;
    Ok((index.to_blob(), chunks))
}

fn checksum(vectors: &[u8], chunks: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(vectors);
    hasher.update(chunks);
    format!("{:x}", hasher.finalize())
}

fn embedding_error(e: anyhow::Error) -> RagError {
    RagError::Embedding(format!("{:#}", e))
}

/// Embed every chunk and build a searchable handle.
///
/// Fails with [`RagError::EmptyCorpus`] when `chunks` is empty; a
/// zero-vector index is never constructed.
pub async fn build(
    embedder: &dyn Embedder,
    chunks: Vec<Chunk>,
    manifest: IndexManifest,
) -> RagResult<IndexHandle> {
    if chunks.is_empty() {
        return Err(RagError::EmptyCorpus);
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embedder.embed(&texts).await.map_err(embedding_error)?;
    if let Some(v) = vectors.iter().find(|v| v.len() != embedder.dims()) {
        return Err(RagError::Embedding(format!(
            "{} returned {} dims, configured for {}",
            embedder.model_name(),
            v.len(),
            embedder.dims()
        )));
    }

    let document_count = chunks
        .iter()
        .map(|c| c.source.as_str())
        .collect::<BTreeSet<_>>()
        .len();
    let index = VectorIndex::build(chunks, vectors)?;
    let (vector_bytes, chunk_bytes) = serialize_index(&index)?;
    let meta = IndexMeta {
        format_version: FORMAT_VERSION,
        embedding_model: embedder.model_name().to_string(),
        dims: index.dims(),
        chunk_count: index.len(),
        document_count,
        built_at: Utc::now(),
        checksum: checksum(&vector_bytes, &chunk_bytes),
    };

    Ok(IndexHandle {
        index,
        manifest,
        meta,
    })
}

/// `<dir>.<suffix>` beside `dir`.
fn sibling(dir: &Path, suffix: &str) -> PathBuf {
    let mut name = dir
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "index".into());
    name.push(format!(".{}", suffix));
    dir.with_file_name(name)
}

/// Write `handle` to `dir`, replacing any previous index.
pub fn persist(handle: &IndexHandle, dir: &Path) -> RagResult<()> {
    if let Some(parent) = dir.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let staging = sibling(dir, "staging");
    if staging.exists() {
        std::fs::remove_dir_all(&staging)?;
    }
    std::fs::create_dir_all(&staging)?;

    let (vector_bytes, chunk_bytes) = serialize_index(&handle.index)?;
    let meta_bytes = serde_json::to_vec_pretty(&handle.meta)
        .map_err(|e| RagError::IndexCorrupt(format!("cannot serialize metadata: {}", e)))?;
    std::fs::write(staging.join(VECTORS_FILE), &vector_bytes)?;
    std::fs::write(staging.join(CHUNKS_FILE), &chunk_bytes)?;
    std::fs::write(staging.join(META_FILE), &meta_bytes)?;
    handle.manifest.save(&staging.join(MANIFEST_FILE))?;

    let retired = sibling(dir, "old");
    if retired.exists() {
        std::fs::remove_dir_all(&retired)?;
    }
    if dir.exists() {
        std::fs::rename(dir, &retired)?;
    }
    std::fs::rename(&staging, dir)?;
    if retired.exists() {
        if let Err(e) = std::fs::remove_dir_all(&retired) {
            tracing::warn!(dir = %retired.display(), error = %e, "could not remove retired index");
        }
    }
    Ok(())
}

fn read_artifact(dir: &Path, name: &str) -> RagResult<Vec<u8>> {
    let path = dir.join(name);
    std::fs::read(&path).map_err(|e| RagError::IndexCorrupt(format!("{}: {}", path.display(), e)))
}

pub fn load_meta(dir: &Path) -> RagResult<IndexMeta> {
    let bytes = read_artifact(dir, META_FILE)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| RagError::IndexCorrupt(format!("{}: {}", META_FILE, e)))
}

/// Load a persisted index.
///
/// Any missing, unreadable or inconsistent artifact is
/// [`RagError::IndexCorrupt`].
pub fn load(dir: &Path) -> RagResult<IndexHandle> {
    let meta = load_meta(dir)?;
    if meta.format_version != FORMAT_VERSION {
        return Err(RagError::IndexCorrupt(format!(
            "unsupported index format version {}",
            meta.format_version
        )));
    }

    let vector_bytes = read_artifact(dir, VECTORS_FILE)?;
    let chunk_bytes = read_artifact(dir, CHUNKS_FILE)?;
    if checksum(&vector_bytes, &chunk_bytes) != meta.checksum {
        return Err(RagError::IndexCorrupt("checksum mismatch".into()));
    }

    let chunks: Vec<Chunk> = serde_json::from_slice(&chunk_bytes)
        .map_err(|e| RagError::IndexCorrupt(format!("{}: {}", CHUNKS_FILE, e)))?;
    if chunks.len() != meta.chunk_count {
        return Err(RagError::IndexCorrupt(format!(
            "{} chunks on disk, metadata says {}",
            chunks.len(),
            meta.chunk_count
        )));
    }

    let index = VectorIndex::from_blob(chunks, meta.dims, &vector_bytes)?;
    let manifest = IndexManifest::load(&dir.join(MANIFEST_FILE))?;
    Ok(IndexHandle {
        index,
        manifest,
        meta,
    })
}

/// True when the manifest persisted in `dir` differs from `current` in any
/// way, or cannot be read.
pub fn is_stale(dir: &Path, current: &IndexManifest) -> bool {
    match IndexManifest::load(&dir.join(MANIFEST_FILE)) {
        Ok(persisted) => &persisted != current,
        Err(_) => true,
    }
}

fn same_model(meta: &IndexMeta, embedder: &dyn Embedder) -> bool {
    meta.embedding_model == embedder.model_name() && meta.dims == embedder.dims()
}

/// Shared owner of the live index.
pub struct IndexStore {
    corpus: CorpusConfig,
    chunking: ChunkingConfig,
    dir: PathBuf,
    embedder: Arc<dyn Embedder>,
    current: RwLock<Option<Arc<IndexHandle>>>,
    state: Mutex<StoreState>,
    build_lock: tokio::sync::Mutex<()>,
    /// Corpus fingerprint and outcome of the most recent build.
    last_build: Mutex<Option<(IndexManifest, BuildReport)>>,
}

impl IndexStore {
    pub fn new(
        corpus: CorpusConfig,
        chunking: ChunkingConfig,
        dir: PathBuf,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            corpus,
            chunking,
            dir,
            embedder,
            current: RwLock::new(None),
            state: Mutex::new(StoreState::Empty),
            build_lock: tokio::sync::Mutex::new(()),
            last_build: Mutex::new(None),
        }
    }

    pub fn from_config(config: &Config, embedder: Arc<dyn Embedder>) -> Self {
        Self::new(
            config.corpus.clone(),
            config.chunking.clone(),
            config.index.dir.clone(),
            embedder,
        )
    }

    pub fn state(&self) -> StoreState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: StoreState) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *guard != state {
            tracing::debug!(from = guard.as_str(), to = state.as_str(), "index state");
            *guard = state;
        }
    }

    /// Report of the last build of exactly this corpus.
    fn last_build_of(&self, manifest: &IndexManifest) -> Option<BuildReport> {
        let guard = self.last_build.lock().unwrap_or_else(|e| e.into_inner());
        match &*guard {
            Some((built, report)) if built == manifest => Some(report.clone()),
            _ => None,
        }
    }

    fn remember_build(&self, manifest: IndexManifest, report: &BuildReport) {
        *self.last_build.lock().unwrap_or_else(|e| e.into_inner()) =
            Some((manifest, report.clone()));
    }

    /// True when the last build of this exact corpus found no usable text.
    fn known_empty(&self, manifest: &IndexManifest) -> bool {
        self.last_build_of(manifest)
            .is_some_and(|report| report.state == StoreState::Empty)
    }

    /// The in-memory handle, if any, without checking staleness.
    pub async fn current(&self) -> Option<Arc<IndexHandle>> {
        self.current.read().await.clone()
    }

    async fn compute_manifest(&self) -> RagResult<IndexManifest> {
        let corpus = self.corpus.clone();
        tokio::task::spawn_blocking(move || IndexManifest::compute(&corpus))
            .await
            .map_err(|e| RagError::Io(std::io::Error::other(e)))?
            .map_err(|e| RagError::Io(std::io::Error::other(format!("{:#}", e))))
    }

    /// Make the index READY, loading or rebuilding as needed.
    ///
    /// Returns `None` when the corpus yields no usable text.
    pub async fn ensure_ready(&self) -> RagResult<Option<Arc<IndexHandle>>> {
        let manifest = self.compute_manifest().await?;

        let previous = self.current().await;
        if let Some(handle) = &previous {
            if handle.manifest == manifest {
                return Ok(previous);
            }
        } else if self.known_empty(&manifest) {
            return Ok(None);
        }

        let _guard = match self.build_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                if previous.is_some() {
                    tracing::debug!("rebuild in flight, serving previous index");
                    return Ok(previous);
                }
                self.build_lock.lock().await
            }
        };

        // Another task may have finished a build while we waited.
        if let Some(handle) = self.current().await {
            if handle.manifest == manifest {
                return Ok(Some(handle));
            }
            self.set_state(StoreState::Stale);
            tracing::info!("corpus changed since the index was built");
        } else if self.known_empty(&manifest) {
            return Ok(None);
        }

        if let Some(handle) = self.try_load(&manifest)? {
            let handle = Arc::new(handle);
            *self.current.write().await = Some(Arc::clone(&handle));
            self.set_state(StoreState::Ready);
            return Ok(Some(handle));
        }

        self.rebuild_locked(manifest).await.map(|(handle, _)| handle)
    }

    /// Load the persisted index if it matches `manifest` and the embedder.
    fn try_load(&self, manifest: &IndexManifest) -> RagResult<Option<IndexHandle>> {
        if !self.dir.join(META_FILE).exists() {
            return Ok(None);
        }
        if is_stale(&self.dir, manifest) {
            self.set_state(StoreState::Stale);
            tracing::info!(dir = %self.dir.display(), "persisted index is stale");
            return Ok(None);
        }
        match load(&self.dir) {
            Ok(handle) if same_model(&handle.meta, self.embedder.as_ref()) => {
                tracing::info!(
                    chunks = handle.chunk_count(),
                    dir = %self.dir.display(),
                    "loaded index"
                );
                Ok(Some(handle))
            }
            Ok(handle) => {
                self.set_state(StoreState::Stale);
                tracing::info!(
                    persisted = %handle.meta.embedding_model,
                    configured = %self.embedder.model_name(),
                    "embedding model changed, index is stale"
                );
                Ok(None)
            }
            Err(RagError::IndexCorrupt(reason)) => {
                tracing::warn!(%reason, "persisted index is corrupt, rebuilding");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Build from the current corpus and swap the result in.
    ///
    /// Caller must hold `build_lock`.
    async fn rebuild_locked(
        &self,
        manifest: IndexManifest,
    ) -> RagResult<(Option<Arc<IndexHandle>>, BuildReport)> {
        self.set_state(StoreState::Building);
        tracing::info!(documents = manifest.files.len(), "building index");

        let corpus = self.corpus.clone();
        let chunking = self.chunking.clone();
        let documents = manifest.files.clone();
        let ingested: IngestReport = match tokio::task::spawn_blocking(move || {
            ingest_documents(&corpus, &chunking, &documents)
        })
        .await
        {
            Ok(report) => report,
            Err(e) => {
                self.clear().await;
                return Err(RagError::Io(std::io::Error::other(e)));
            }
        };
        tracing::debug!(
            indexed = ingested.documents_indexed,
            chunks = ingested.chunks.len(),
            "ingested corpus"
        );
        let skipped = ingested.skipped;

        let built = build(self.embedder.as_ref(), ingested.chunks, manifest.clone()).await;
        let handle = match built {
            Ok(handle) => handle,
            Err(RagError::EmptyCorpus) => {
                tracing::warn!("corpus has no usable text, index unavailable");
                self.clear().await;
                let report = BuildReport {
                    state: StoreState::Empty,
                    chunk_count: 0,
                    document_count: 0,
                    skipped,
                };
                self.remember_build(manifest, &report);
                return Ok((None, report));
            }
            Err(e) => {
                self.clear().await;
                return Err(e);
            }
        };

        if let Err(e) = persist(&handle, &self.dir) {
            self.clear().await;
            return Err(e);
        }

        let report = BuildReport {
            state: StoreState::Ready,
            chunk_count: handle.chunk_count(),
            document_count: handle.document_count(),
            skipped,
        };
        tracing::info!(
            chunks = report.chunk_count,
            documents = report.document_count,
            skipped = report.skipped.len(),
            "index built"
        );
        self.remember_build(manifest, &report);

        let handle = Arc::new(handle);
        *self.current.write().await = Some(Arc::clone(&handle));
        self.set_state(StoreState::Ready);
        Ok((Some(handle), report))
    }

    async fn clear(&self) {
        *self.current.write().await = None;
        self.set_state(StoreState::Empty);
    }

    /// Discard persisted artifacts and rebuild from the corpus.
    ///
    /// The previous in-memory handle keeps serving queries until the new
    /// one is swapped in. If another build is in flight, waits for it and
    /// returns its report when the corpus is unchanged. Safe to call when
    /// no index exists.
    pub async fn force_rebuild(&self) -> RagResult<BuildReport> {
        let _guard = match self.build_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::debug!("rebuild in flight, waiting for it");
                let guard = self.build_lock.lock().await;
                let manifest = self.compute_manifest().await?;
                if let Some(report) = self.last_build_of(&manifest) {
                    let live = self
                        .current()
                        .await
                        .is_some_and(|handle| handle.manifest == manifest);
                    if live == (report.state == StoreState::Ready) {
                        return Ok(report);
                    }
                }
                guard
            }
        };
        tracing::info!(dir = %self.dir.display(), "forcing index rebuild");

        for path in [self.dir.clone(), sibling(&self.dir, "staging")] {
            if tokio::fs::try_exists(&path).await? {
                tokio::fs::remove_dir_all(&path).await?;
            }
        }

        let manifest = self.compute_manifest().await?;
        self.rebuild_locked(manifest).await.map(|(_, report)| report)
    }

    /// Embed `query` with the build-time model and return the `k` nearest chunks.
    pub async fn search(
        &self,
        handle: &IndexHandle,
        query: &str,
        k: usize,
    ) -> RagResult<Vec<RetrievalPair>> {
        if k == 0 {
            return Err(RagError::InvalidArgument("k must be >= 1".into()));
        }
        let vector = self
            .embedder
            .embed_query(query)
            .await
            .map_err(embedding_error)?;
        handle.search_vector(&vector, k)
    }

    /// Report state, persisted metadata and staleness without building.
    pub async fn status(&self) -> RagResult<IndexStatus> {
        let manifest = self.compute_manifest().await?;
        let state = self.state();

        if let Some(handle) = self.current().await {
            return Ok(IndexStatus {
                state,
                chunk_count: handle.chunk_count(),
                document_count: handle.document_count(),
                embedding_model: Some(handle.meta.embedding_model.clone()),
                built_at: Some(handle.meta.built_at),
                stale: handle.manifest != manifest,
            });
        }

        match load_meta(&self.dir) {
            Ok(meta) => {
                let persisted = IndexManifest::load(&self.dir.join(MANIFEST_FILE)).ok();
                let stale = persisted.as_ref() != Some(&manifest)
                    || !same_model(&meta, self.embedder.as_ref());
                Ok(IndexStatus {
                    state,
                    chunk_count: meta.chunk_count,
                    document_count: meta.document_count,
                    embedding_model: Some(meta.embedding_model),
                    built_at: Some(meta.built_at),
                    stale,
                })
            }
            Err(_) => Ok(IndexStatus {
                state,
                chunk_count: 0,
                document_count: 0,
                embedding_model: None,
                built_at: None,
                stale: false,
            }),
        }
    }
}
