//! # Guideline RAG
//!
//! A strict retrieval-augmented answering engine over a local corpus of
//! guideline documents. Answers are built only from excerpts that can be
//! traced verbatim to the corpus; when the corpus does not cover a
//! question, the engine returns a fixed fallback instead of guessing.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌────────────┐
//! │  Corpus  │──▶│ Extract+Chunk │──▶│ Index Store│
//! │ PDF/PPTX │   │    +Embed     │   │ flat L2    │
//! └──────────┘   └──────────────┘   └─────┬──────┘
//!                                         │ top-k
//!           ┌──────────┐   ┌───────────┐  ▼
//!           │ Evidence │◀──│ Generator │◀─ Coverage
//!           │ Validator│   └───────────┘   CLEAR/PARTIAL/NONE
//!           └────┬─────┘
//!                ▼
//!        citations + guardrails ──▶ CLI (`grag`) / HTTP
//! ```
//!
//! Pure logic (chunking, the vector index, coverage, prompts, evidence
//! validation, guardrails) lives in the `guideline-rag-core` crate. This
//! crate adds configuration, file I/O, model providers, and the surfaces.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`extract`] | Per-page text extraction (PDF, PPTX, DOCX, TXT, MD) |
//! | [`manifest`] | Corpus scanning and the staleness fingerprint |
//! | [`ingest`] | Extraction plus chunking over the corpus |
//! | [`embedding`] | Embedding providers |
//! | [`generation`] | Generation providers |
//! | [`synth`] | Prompted answer generation with timeout |
//! | [`index_store`] | Build, persist, load, and staleness state machine |
//! | [`engine`] | The end-to-end `answer` operation |
//! | [`server`] | HTTP query API |

pub mod config;
pub mod embedding;
pub mod engine;
pub mod extract;
pub mod generation;
mod http;
pub mod index_store;
pub mod ingest;
pub mod logging;
pub mod manifest;
pub mod server;
pub mod synth;
