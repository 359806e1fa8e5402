//! Corpus scanning and the manifest fingerprint.
//!
//! A manifest lists every corpus file with its size and modification time.
//! The persisted index is valid only while the manifest recomputed from the
//! corpus equals the persisted one; any added, removed, resized, or
//! retouched file makes the index stale.

use std::path::Path;

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use guideline_rag_core::models::SourceDocument;
use guideline_rag_core::{RagError, RagResult};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::config::CorpusConfig;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Excluded on top of the configured patterns.
const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", ".*/**", "**/.*/**"];

/// Walk the corpus directory and return its documents sorted by name.
///
/// A missing corpus directory scans as empty. Entries that cannot be read
/// (broken symlinks, permission errors) are skipped with a warning.
pub fn scan_corpus(corpus: &CorpusConfig) -> Result<Vec<SourceDocument>> {
    let root = &corpus.dir;
    if !root.exists() {
        tracing::warn!(dir = %root.display(), "corpus directory does not exist");
        return Ok(Vec::new());
    }

    let include_set = build_globset(&corpus.include_globs)?;
    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(corpus.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut documents = Vec::new();
    for entry in WalkDir::new(root).follow_links(corpus.follow_symlinks) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().map(|p| p.display().to_string()).unwrap_or_default();
                tracing::warn!(%path, error = %e, "skipping unreadable corpus entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if exclude_set.is_match(&name) || !include_set.is_match(&name) {
            continue;
        }

        match describe(path, name) {
            Ok(document) => documents.push(document),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable corpus file");
            }
        }
    }

    documents.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(documents)
}

fn describe(path: &Path, name: String) -> Result<SourceDocument> {
    let metadata = std::fs::metadata(path)?;
    let mtime = metadata
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;

    Ok(SourceDocument {
        name,
        size: metadata.len(),
        mtime,
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Fingerprint of the corpus at build time.
///
/// Serializes as `{"pdf_dir": "...", "files": [{"name", "size", "mtime"}]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub pdf_dir: String,
    pub files: Vec<SourceDocument>,
}

impl IndexManifest {
    pub fn new(corpus_dir: &Path, mut files: Vec<SourceDocument>) -> Self {
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            pdf_dir: corpus_dir.display().to_string(),
            files,
        }
    }

    /// Scan the corpus and fingerprint it.
    pub fn compute(corpus: &CorpusConfig) -> Result<Self> {
        Ok(Self::new(&corpus.dir, scan_corpus(corpus)?))
    }

    pub fn load(path: &Path) -> RagResult<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| RagError::IndexCorrupt(format!("{}: {}", path.display(), e)))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| RagError::IndexCorrupt(format!("{}: {}", path.display(), e)))
    }

    /// Pretty JSON with a trailing newline; identical manifests produce
    /// identical bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = serde_json::to_vec_pretty(self).unwrap_or_default();
        bytes.push(b'\n');
        bytes
    }

    pub fn save(&self, path: &Path) -> RagResult<()> {
        std::fs::write(path, self.to_bytes())?;
        Ok(())
    }
}
