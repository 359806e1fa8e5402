//! Shared fixtures: a temp corpus, a config pointing at it, and stub
//! embedding and generation providers with call counters.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use guideline_rag::config::{parse_config, Config};
use guideline_rag::engine::Engine;
use guideline_rag_core::embedding::Embedder;
use guideline_rag_core::generation::{CompletionRequest, Generator};
use tempfile::TempDir;

pub const DIABETES_DOC: &str = "Diabetes is a chronic disease that affects how the body uses blood sugar.\n\n\
Regular physical activity helps keep blood sugar under control.";

pub const GROUNDED_ANSWER: &str = "Direct Answer:\n\
- Stay physically active every day.\n\n\
Guideline Evidence:\n\
> Regular physical activity helps keep blood sugar under control.";

pub const UNGROUNDED_ANSWER: &str = "Direct Answer:\n\
- Eat cinnamon daily.\n\n\
Guideline Evidence:\n\
> Cinnamon cures high blood sugar in most adults.";

/// Maps text to a fixed vector by keyword; the first matching rule wins.
///
/// Batch calls (index builds) wait on `gate`, so a test can hold a build
/// in flight with [`StubEmbedder::hold_batches`]. Query embeddings never
/// wait.
///
/// With chunk vector `[1, 0, 0]`, a query vector `[1, 0.2236, 0]` sits at
/// squared distance 0.05 (CLEAR), `[1, 0, 1.2247]` at 1.5 (PARTIAL) and
/// `[1, 0, 1.7321]` at 3.0 (NONE).
pub struct StubEmbedder {
    model: String,
    rules: Vec<(&'static str, Vec<f32>)>,
    fallback: Vec<f32>,
    gate: tokio::sync::RwLock<()>,
    /// Every embedding call, batch or query.
    pub calls: AtomicUsize,
    /// Batch calls only.
    pub batches: AtomicUsize,
}

impl StubEmbedder {
    pub fn new() -> Self {
        Self::named("stub-embedder")
    }

    pub fn named(model: &str) -> Self {
        Self {
            model: model.to_string(),
            rules: vec![
                ("symptoms", vec![1.0, 0.2236, 0.0]),
                ("fever", vec![1.0, 0.0, 1.2247]),
                ("volcano", vec![1.0, 0.0, 1.7321]),
                ("diabetes", vec![1.0, 0.0, 0.0]),
            ],
            fallback: vec![0.0, 1.0, 0.0],
            gate: tokio::sync::RwLock::new(()),
            calls: AtomicUsize::new(0),
            batches: AtomicUsize::new(0),
        }
    }

    /// Block batch embedding until the returned guard is dropped.
    pub async fn hold_batches(&self) -> tokio::sync::RwLockWriteGuard<'_, ()> {
        self.gate.write().await
    }

    pub fn batch_count(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let lowered = text.to_lowercase();
        self.rules
            .iter()
            .find(|(keyword, _)| lowered.contains(keyword))
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        3
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.batches.fetch_add(1, Ordering::SeqCst);
        let _open = self.gate.read().await;
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vector_for(text))
    }
}

/// Returns a canned response and records every request.
pub struct StubGenerator {
    response: Mutex<Result<String, String>>,
    pub calls: AtomicUsize,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl StubGenerator {
    pub fn replying(text: &str) -> Self {
        Self {
            response: Mutex::new(Ok(text.to_string())),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            response: Mutex::new(Err(message.to_string())),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for StubGenerator {
    fn model_name(&self) -> &str {
        "stub-generator"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        match &*self.response.lock().unwrap() {
            Ok(text) => Ok(text.clone()),
            Err(message) => Err(anyhow::anyhow!("{}", message)),
        }
    }
}

/// A temp workspace with `corpus/` and a config whose index lives in `index/`.
pub struct Workspace {
    pub tmp: TempDir,
    pub corpus: PathBuf,
    pub index: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let corpus = tmp.path().join("corpus");
        std::fs::create_dir_all(&corpus).unwrap();
        let index = tmp.path().join("index");
        Self { tmp, corpus, index }
    }

    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.corpus.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn config_text(&self, extra: &str) -> String {
        format!(
            r#"[corpus]
dir = "{corpus}"

[index]
dir = "{index}"

[embedding]
provider = "hash"
model = "hash-test"
dims = 64

[generation]
provider = "ollama"
model = "stub-generator"
timeout_secs = 5

{extra}
"#,
            corpus = self.corpus.display(),
            index = self.index.display(),
            extra = extra,
        )
    }

    pub fn config(&self) -> Config {
        parse_config(&self.config_text("")).unwrap()
    }

    pub fn config_with(&self, extra: &str) -> Config {
        parse_config(&self.config_text(extra)).unwrap()
    }

    pub fn write_config(&self, extra: &str) -> PathBuf {
        let path = self.tmp.path().join("grag.toml");
        std::fs::write(&path, self.config_text(extra)).unwrap();
        path
    }
}

pub fn engine(
    config: &Config,
    embedder: Arc<StubEmbedder>,
    generator: Arc<StubGenerator>,
) -> Engine {
    Engine::new(config, embedder, generator).unwrap()
}

pub fn index_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

/// A one-page PDF with valid xref offsets around `content`.
///
/// `BT /F1 12 Tf ... ET` without a `/Resources` font entry is enough to
/// make the PDF parser give up on the file.
pub fn pdf_with_content(content: &str) -> String {
    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R >>".to_string(),
        format!("<< /Length {} >>\nstream\n{}\nendstream", content.len(), content),
    ];
    let mut out = String::from("%PDF-1.4\n");
    let mut offsets = Vec::new();
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.push_str(&format!("{} 0 obj\n{}\nendobj\n", i + 1, body));
    }
    let xref = out.len();
    out.push_str(&format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1));
    for offset in offsets {
        out.push_str(&format!("{:010} 00000 n \n", offset));
    }
    out.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
        objects.len() + 1,
        xref
    ));
    out
}

/// Poll `done` until it holds, failing after five seconds.
pub async fn wait_until(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while !done() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}
