//! # Gutenberg Analyst Core
//!
//! Runtime-agnostic logic for gutenberg-analyst: book and analysis models,
//! the content normalizer, text fingerprints, the error taxonomy, and the
//! storage / provider traits the coordinator is built on.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem dependencies and
//! performs no logging. Persistence backends, the LLM provider, and the
//! in-flight request coordinator live in the `gutenberg-analyst` crate.

pub mod error;
pub mod fingerprint;
pub mod models;
pub mod normalize;
pub mod provider;
pub mod store;

pub use error::{AnalysisError, AnalysisResult, ProviderError};
pub use fingerprint::Fingerprint;
pub use models::{AnalysisKind, AnalysisPayload, AnalysisRecord, Book, BookId, BookSummary};
pub use normalize::ContentBound;
