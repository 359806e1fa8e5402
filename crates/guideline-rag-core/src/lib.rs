//! # Guideline RAG Core
//!
//! Pure retrieval and answer-checking logic for Guideline RAG: data models,
//! chunking, the flat vector index, coverage classification, prompt
//! construction, evidence validation, and safety guardrails.
//!
//! This crate does no filesystem or network I/O. Text extraction,
//! index persistence, and concrete model providers live in the
//! `guideline-rag` app crate.

pub mod chunk;
pub mod citation;
pub mod coverage;
pub mod embedding;
pub mod error;
pub mod evidence;
pub mod generation;
pub mod guardrail;
pub mod index;
pub mod models;
pub mod prompt;

pub use error::{RagError, RagResult};
