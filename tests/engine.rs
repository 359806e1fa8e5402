//! End-to-end tests of the answering engine and the index store, using
//! stub providers so no network or model download is involved.

mod common;

use std::fs::File;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use guideline_rag::engine::INDEX_UNAVAILABLE;
use guideline_rag::index_store::{self, IndexStore, StoreState, META_FILE};
use guideline_rag::manifest::{IndexManifest, MANIFEST_FILE};
use guideline_rag_core::evidence::{EvidenceReason, STRICT_FALLBACK};
use guideline_rag_core::guardrail::{RiskLevel, STANDARD_DISCLAIMER};
use guideline_rag_core::models::Coverage;
use guideline_rag_core::RagError;

fn providers(answer: &str) -> (Arc<StubEmbedder>, Arc<StubGenerator>) {
    (
        Arc::new(StubEmbedder::new()),
        Arc::new(StubGenerator::replying(answer)),
    )
}

#[tokio::test]
async fn empty_corpus_answers_index_unavailable() {
    let ws = Workspace::new();
    let (embedder, generator) = providers(GROUNDED_ANSWER);
    let engine = engine(&ws.config(), embedder, generator.clone());

    let answer = engine.answer("How can dengue be prevented?", "en").await.unwrap();
    assert_eq!(answer.text, INDEX_UNAVAILABLE);
    assert_eq!(answer.coverage, Coverage::None);
    assert!(answer.pairs.is_empty());
    assert_eq!(generator.call_count(), 0);
    assert_eq!(engine.store().state(), StoreState::Empty);
    assert!(!ws.index.join(META_FILE).exists());
}

#[tokio::test]
async fn unreadable_documents_count_as_empty() {
    let ws = Workspace::new();
    ws.write("blank.txt", "   \n\n  ");
    ws.write("broken.docx", "not a zip archive");
    let (embedder, generator) = providers(GROUNDED_ANSWER);
    let engine = engine(&ws.config(), embedder, generator.clone());

    let answer = engine.answer("diabetes?", "en").await.unwrap();
    assert_eq!(answer.text, INDEX_UNAVAILABLE);
    assert_eq!(generator.call_count(), 0);
}

#[tokio::test]
async fn covered_question_gets_grounded_answer_with_sources() {
    let ws = Workspace::new();
    ws.write("diabetes.md", DIABETES_DOC);
    let (embedder, generator) = providers(GROUNDED_ANSWER);
    let engine = engine(&ws.config(), embedder, generator.clone());

    let answer = engine
        .answer("What are the symptoms of diabetes?", "en")
        .await
        .unwrap();

    assert_eq!(answer.coverage, Coverage::Clear);
    assert_eq!(answer.risk, RiskLevel::General);
    let check = answer.evidence.unwrap();
    assert!(check.ok);
    assert_eq!(check.reason, EvidenceReason::EvidenceOk);

    assert!(answer.text.starts_with("Direct Answer:"));
    assert!(answer
        .text
        .contains("> Regular physical activity helps keep blood sugar under control."));
    assert!(answer.text.contains(STANDARD_DISCLAIMER));
    assert!(answer
        .text
        .ends_with("**Sources (guidelines)**\n- **diabetes.md**"));

    let retrieved = answer.retrieved();
    assert_eq!(retrieved.len(), 1);
    assert_eq!(retrieved[0].source, "diabetes.md");
    assert!((retrieved[0].score - 0.05).abs() < 1e-3);
    assert_eq!(generator.call_count(), 1);
}

#[tokio::test]
async fn generator_receives_question_and_excerpts() {
    let ws = Workspace::new();
    ws.write("diabetes.md", DIABETES_DOC);
    let (embedder, generator) = providers(GROUNDED_ANSWER);
    let engine = engine(&ws.config(), embedder, generator.clone());

    engine
        .answer("What are the symptoms of diabetes?", "hi")
        .await
        .unwrap();

    let requests = generator.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].temperature, 0.0);
    assert!(requests[0].user.contains("What are the symptoms of diabetes?"));
    assert!(requests[0]
        .user
        .contains("Regular physical activity helps keep blood sugar under control."));
}

#[tokio::test]
async fn partial_coverage_still_generates() {
    let ws = Workspace::new();
    ws.write("diabetes.md", DIABETES_DOC);
    let (embedder, generator) = providers(GROUNDED_ANSWER);
    let engine = engine(&ws.config(), embedder, generator.clone());

    let answer = engine.answer("Is fever a concern?", "en").await.unwrap();
    assert_eq!(answer.coverage, Coverage::Partial);
    assert_eq!(generator.call_count(), 1);
    assert!(answer.text.contains("**Sources (guidelines)**"));
}

#[tokio::test]
async fn uncovered_question_skips_generation() {
    let ws = Workspace::new();
    ws.write("diabetes.md", DIABETES_DOC);
    let (embedder, generator) = providers(GROUNDED_ANSWER);
    let engine = engine(&ws.config(), embedder, generator.clone());

    let answer = engine
        .answer("When did the volcano last erupt?", "en")
        .await
        .unwrap();

    assert_eq!(answer.text, STRICT_FALLBACK);
    assert_eq!(answer.coverage, Coverage::None);
    assert_eq!(answer.pairs.len(), 1);
    assert!(answer.evidence.is_none());
    assert_eq!(generator.call_count(), 0);
}

#[tokio::test]
async fn ungrounded_evidence_is_replaced_by_fallback() {
    let ws = Workspace::new();
    ws.write("diabetes.md", DIABETES_DOC);
    let (embedder, generator) = providers(UNGROUNDED_ANSWER);
    let engine = engine(&ws.config(), embedder, generator);

    let answer = engine
        .answer("What are the symptoms of diabetes?", "en")
        .await
        .unwrap();

    assert_eq!(answer.text, STRICT_FALLBACK);
    assert_eq!(answer.coverage, Coverage::Clear);
    let check = answer.evidence.unwrap();
    assert!(!check.ok);
    assert_eq!(check.reason, EvidenceReason::EvidenceNotVerbatim);
}

#[tokio::test]
async fn answer_without_blockquote_is_rejected() {
    let ws = Workspace::new();
    ws.write("diabetes.md", DIABETES_DOC);
    let (embedder, generator) = providers(
        "Direct Answer:\n- Stay active.\n\nGuideline Evidence:\nRegular physical activity helps keep blood sugar under control.",
    );
    let engine = engine(&ws.config(), embedder, generator);

    let answer = engine
        .answer("What are the symptoms of diabetes?", "en")
        .await
        .unwrap();
    assert_eq!(answer.text, STRICT_FALLBACK);
    assert_eq!(
        answer.evidence.unwrap().reason,
        EvidenceReason::MissingBlockquote
    );
}

#[tokio::test]
async fn model_fallback_passes_through_unwrapped() {
    let ws = Workspace::new();
    ws.write("diabetes.md", DIABETES_DOC);
    let (embedder, generator) = providers(&format!("  {}\n", STRICT_FALLBACK));
    let engine = engine(&ws.config(), embedder, generator);

    let answer = engine
        .answer("What are the symptoms of diabetes?", "en")
        .await
        .unwrap();
    assert_eq!(answer.text, STRICT_FALLBACK);
    let check = answer.evidence.unwrap();
    assert!(check.ok);
    assert_eq!(check.reason, EvidenceReason::FallbackOk);
}

#[tokio::test]
async fn lean_mode_skips_verbatim_matching() {
    let ws = Workspace::new();
    ws.write("diabetes.md", DIABETES_DOC);
    let (embedder, generator) = providers(UNGROUNDED_ANSWER);
    let config = ws.config_with("[validation]\nmode = \"lean\"\n");
    let engine = engine(&config, embedder, generator);

    let answer = engine
        .answer("What are the symptoms of diabetes?", "en")
        .await
        .unwrap();
    assert!(answer.text.contains("Cinnamon cures"));
    assert_eq!(answer.evidence.unwrap().reason, EvidenceReason::EvidenceOk);
}

#[tokio::test]
async fn emergency_question_gets_notice() {
    let ws = Workspace::new();
    ws.write("diabetes.md", DIABETES_DOC);
    let (embedder, generator) = providers(GROUNDED_ANSWER);
    let engine = engine(&ws.config(), embedder, generator);

    let answer = engine
        .answer("Chest pain and diabetes symptoms, what now?", "en")
        .await
        .unwrap();
    assert_eq!(answer.risk, RiskLevel::Emergency);
    assert!(answer.text.starts_with("⚠️ This may be a medical emergency."));
}

#[tokio::test]
async fn generation_failure_is_an_error_not_a_fallback() {
    let ws = Workspace::new();
    ws.write("diabetes.md", DIABETES_DOC);
    let embedder = Arc::new(StubEmbedder::new());
    let generator = Arc::new(StubGenerator::failing("upstream 503"));
    let engine = engine(&ws.config(), embedder, generator);

    let err = engine
        .answer("What are the symptoms of diabetes?", "en")
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Generation(ref m) if m.contains("upstream 503")));
}

#[tokio::test]
async fn empty_query_is_rejected() {
    let ws = Workspace::new();
    let (embedder, generator) = providers(GROUNDED_ANSWER);
    let engine = engine(&ws.config(), embedder, generator);

    let err = engine.answer("   ", "en").await.unwrap_err();
    assert!(matches!(err, RagError::InvalidArgument(_)));
}

#[tokio::test]
async fn index_is_reused_across_questions() {
    let ws = Workspace::new();
    ws.write("diabetes.md", DIABETES_DOC);
    let (embedder, generator) = providers(GROUNDED_ANSWER);
    let engine = engine(&ws.config(), embedder.clone(), generator);

    engine.answer("diabetes care?", "en").await.unwrap();
    engine.answer("diabetes diet?", "en").await.unwrap();

    // One batch for the build, one query embedding per question.
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    assert_eq!(engine.store().state(), StoreState::Ready);
}

// ============ Index store ============

fn store(ws: &Workspace, embedder: Arc<StubEmbedder>) -> IndexStore {
    IndexStore::from_config(&ws.config(), embedder)
}

#[tokio::test]
async fn persisted_index_loads_without_embedding() {
    let ws = Workspace::new();
    ws.write("diabetes.md", DIABETES_DOC);

    let first = store(&ws, Arc::new(StubEmbedder::new()));
    first.ensure_ready().await.unwrap().unwrap();
    assert_eq!(
        index_files(&ws.index),
        vec!["chunks.json", "index.json", "manifest.json", "vectors.bin"]
    );

    let embedder = Arc::new(StubEmbedder::new());
    let second = store(&ws, embedder.clone());
    let handle = second.ensure_ready().await.unwrap().unwrap();
    assert_eq!(handle.chunk_count(), 1);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    assert_eq!(second.state(), StoreState::Ready);
}

#[tokio::test]
async fn load_preserves_chunk_order_and_vectors() {
    let ws = Workspace::new();
    ws.write("a.md", "Diabetes first.\n\nMore diabetes text.");
    ws.write("b.md", "Volcano safety leaflet.");
    ws.write("c.md", "Unrelated notes.");

    let store = store(&ws, Arc::new(StubEmbedder::new()));
    let built = store.ensure_ready().await.unwrap().unwrap();
    let loaded = index_store::load(&ws.index).unwrap();

    assert_eq!(loaded.index.chunks(), built.index.chunks());
    assert_eq!(loaded.index.to_blob(), built.index.to_blob());
    assert_eq!(loaded.meta, built.meta);

    let hits = loaded.search_vector(&[1.0, 0.0, 0.0], 3).unwrap();
    assert_eq!(hits[0].chunk.source, "a.md");
    assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
}

#[tokio::test]
async fn rebuild_is_deterministic() {
    let ws = Workspace::new();
    ws.write("diabetes.md", DIABETES_DOC);
    ws.write("guides/hygiene.txt", "Wash hands with soap for twenty seconds.");
    let store = store(&ws, Arc::new(StubEmbedder::new()));

    let first = store.force_rebuild().await.unwrap();
    let manifest_a = std::fs::read(ws.index.join(MANIFEST_FILE)).unwrap();
    let chunks_a = std::fs::read(ws.index.join(index_store::CHUNKS_FILE)).unwrap();

    let second = store.force_rebuild().await.unwrap();
    let manifest_b = std::fs::read(ws.index.join(MANIFEST_FILE)).unwrap();
    let chunks_b = std::fs::read(ws.index.join(index_store::CHUNKS_FILE)).unwrap();

    assert_eq!(first.chunk_count, second.chunk_count);
    assert_eq!(first.document_count, 2);
    assert_eq!(manifest_a, manifest_b);
    assert_eq!(chunks_a, chunks_b);
    assert!(!ws.tmp.path().join("index.staging").exists());
    assert!(!ws.tmp.path().join("index.old").exists());
}

#[tokio::test]
async fn force_rebuild_without_existing_index() {
    let ws = Workspace::new();
    ws.write("diabetes.md", DIABETES_DOC);
    let store = store(&ws, Arc::new(StubEmbedder::new()));

    let report = store.force_rebuild().await.unwrap();
    assert_eq!(report.state, StoreState::Ready);
    assert_eq!(report.chunk_count, 1);
}

#[tokio::test]
async fn modified_file_marks_index_stale() {
    let ws = Workspace::new();
    let path = ws.write("diabetes.md", DIABETES_DOC);
    let store = store(&ws, Arc::new(StubEmbedder::new()));
    store.ensure_ready().await.unwrap();

    let original = std::fs::metadata(&path).unwrap().modified().unwrap();
    let file = File::options().write(true).open(&path).unwrap();
    file.set_modified(original + Duration::from_secs(120)).unwrap();
    let current = IndexManifest::compute(&ws.config().corpus).unwrap();
    assert!(index_store::is_stale(&ws.index, &current));
    assert!(store.status().await.unwrap().stale);

    file.set_modified(original).unwrap();
    let current = IndexManifest::compute(&ws.config().corpus).unwrap();
    assert!(!index_store::is_stale(&ws.index, &current));
}

#[tokio::test]
async fn added_document_triggers_rebuild_on_next_question() {
    let ws = Workspace::new();
    ws.write("diabetes.md", DIABETES_DOC);
    let (embedder, generator) = providers(GROUNDED_ANSWER);
    let engine = engine(&ws.config(), embedder, generator);

    let before = engine.store().ensure_ready().await.unwrap().unwrap();
    assert_eq!(before.document_count(), 1);

    ws.write("volcano.md", "Volcano ash can irritate the lungs.");
    let after = engine.store().ensure_ready().await.unwrap().unwrap();
    assert_eq!(after.document_count(), 2);
    assert_eq!(after.chunk_count(), 2);
}

#[tokio::test]
async fn embedding_model_change_invalidates_index() {
    let ws = Workspace::new();
    ws.write("diabetes.md", DIABETES_DOC);
    store(&ws, Arc::new(StubEmbedder::named("model-a")))
        .ensure_ready()
        .await
        .unwrap();

    let embedder = Arc::new(StubEmbedder::named("model-b"));
    let other = store(&ws, embedder.clone());
    assert!(other.status().await.unwrap().stale);

    let handle = other.ensure_ready().await.unwrap().unwrap();
    assert_eq!(handle.meta.embedding_model, "model-b");
    assert!(embedder.calls.load(Ordering::SeqCst) > 0);
}

#[tokio::test]
async fn corrupt_index_is_rebuilt() {
    let ws = Workspace::new();
    ws.write("diabetes.md", DIABETES_DOC);
    store(&ws, Arc::new(StubEmbedder::new()))
        .ensure_ready()
        .await
        .unwrap();

    std::fs::write(ws.index.join(index_store::VECTORS_FILE), b"garbage").unwrap();
    assert!(matches!(
        index_store::load(&ws.index),
        Err(RagError::IndexCorrupt(_))
    ));

    let embedder = Arc::new(StubEmbedder::new());
    let handle = store(&ws, embedder.clone())
        .ensure_ready()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(handle.chunk_count(), 1);
    assert!(embedder.calls.load(Ordering::SeqCst) > 0);
    assert!(index_store::load(&ws.index).is_ok());
}

#[tokio::test]
async fn status_reports_persisted_metadata_without_building() {
    let ws = Workspace::new();
    ws.write("diabetes.md", DIABETES_DOC);

    let fresh = store(&ws, Arc::new(StubEmbedder::new()));
    let status = fresh.status().await.unwrap();
    assert_eq!(status.state, StoreState::Empty);
    assert_eq!(status.chunk_count, 0);
    assert!(status.embedding_model.is_none());

    fresh.ensure_ready().await.unwrap();

    let embedder = Arc::new(StubEmbedder::new());
    let status = store(&ws, embedder.clone()).status().await.unwrap();
    assert_eq!(status.chunk_count, 1);
    assert_eq!(status.document_count, 1);
    assert_eq!(status.embedding_model.as_deref(), Some("stub-embedder"));
    assert!(!status.stale);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
}

// ============ Unreadable corpus files ============

#[cfg(unix)]
#[tokio::test]
async fn dangling_symlink_does_not_block_answers() {
    let ws = Workspace::new();
    ws.write("diabetes.md", DIABETES_DOC);
    std::os::unix::fs::symlink(ws.corpus.join("gone.md"), ws.corpus.join("dangling.md")).unwrap();
    let mut config = ws.config();
    config.corpus.follow_symlinks = true;
    let (embedder, generator) = providers(GROUNDED_ANSWER);
    let engine = engine(&config, embedder, generator);

    let answer = engine
        .answer("What are the symptoms of diabetes?", "en")
        .await
        .unwrap();
    assert_eq!(answer.coverage, Coverage::Clear);
    assert_eq!(answer.retrieved()[0].source, "diabetes.md");
    let handle = engine.store().current().await.unwrap();
    assert_eq!(handle.manifest.files.len(), 1);
}

#[tokio::test]
async fn malformed_pdf_is_skipped() {
    let ws = Workspace::new();
    ws.write("diabetes.md", DIABETES_DOC);
    ws.write(
        "broken.pdf",
        &pdf_with_content("BT /F1 12 Tf 72 712 Td (Hello) Tj ET"),
    );
    let store = store(&ws, Arc::new(StubEmbedder::new()));

    let report = store.force_rebuild().await.unwrap();
    assert_eq!(report.state, StoreState::Ready);
    assert_eq!(report.document_count, 1);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].0, "broken.pdf");

    let handle = store.ensure_ready().await.unwrap().unwrap();
    let hits = store.search(&handle, "symptoms of diabetes", 1).await.unwrap();
    assert_eq!(hits[0].chunk.source, "diabetes.md");
}

// ============ Concurrency ============

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_rebuilds_run_one_build_while_queries_use_previous_index() {
    let ws = Workspace::new();
    ws.write("diabetes.md", DIABETES_DOC);
    let embedder = Arc::new(StubEmbedder::new());
    let store = Arc::new(store(&ws, embedder.clone()));
    let before = store.ensure_ready().await.unwrap().unwrap();
    assert_eq!(embedder.batch_count(), 1);

    let hold = embedder.hold_batches().await;
    let first = tokio::spawn({
        let store = Arc::clone(&store);
        async move { store.force_rebuild().await }
    });
    wait_until(|| embedder.batch_count() == 2).await;
    assert_eq!(store.state(), StoreState::Building);

    let second = tokio::spawn({
        let store = Arc::clone(&store);
        async move { store.force_rebuild().await }
    });
    // Let the second rebuild reach the build lock.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let served = store.ensure_ready().await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&served, &before));
    let hits = store.search(&served, "symptoms of diabetes", 1).await.unwrap();
    assert_eq!(hits[0].chunk.source, "diabetes.md");

    drop(hold);
    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    assert_eq!(first.state, StoreState::Ready);
    assert_eq!(second.state, StoreState::Ready);
    assert_eq!(second.chunk_count, first.chunk_count);
    assert_eq!(embedder.batch_count(), 2);

    let after = store.current().await.unwrap();
    assert!(!Arc::ptr_eq(&after, &before));
    assert_eq!(store.state(), StoreState::Ready);
}

#[tokio::test]
async fn empty_build_is_not_repeated_for_unchanged_corpus() {
    let ws = Workspace::new();
    let path = ws.write("notes.txt", "   ");
    let store = store(&ws, Arc::new(StubEmbedder::new()));
    assert!(store.ensure_ready().await.unwrap().is_none());
    let original = std::fs::metadata(&path).unwrap().modified().unwrap();

    // Same size and mtime: the corpus fingerprint is unchanged, so the
    // file is not read again.
    std::fs::write(&path, "flu").unwrap();
    let file = File::options().write(true).open(&path).unwrap();
    file.set_modified(original).unwrap();
    assert!(store.ensure_ready().await.unwrap().is_none());
    assert_eq!(store.state(), StoreState::Empty);

    file.set_modified(original + Duration::from_secs(120)).unwrap();
    let handle = store.ensure_ready().await.unwrap().unwrap();
    assert_eq!(handle.chunk_count(), 1);
}
