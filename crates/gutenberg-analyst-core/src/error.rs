//! Error taxonomy for the analysis cache.
//!
//! Every failure is per-request and surfaces to the immediate caller as a
//! typed [`AnalysisError`]. Errors are `Clone` because a single provider
//! failure is delivered to every caller waiting on the same computation.

use std::time::Duration;
use thiserror::Error;

use crate::models::{AnalysisKind, BookId};

/// Failure of the external analysis provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("provider request failed: {0}")]
    Http(String),

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("analysis provider is disabled")]
    Disabled,

    #[error("analysis computation aborted before completing")]
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    #[error("book not found: {0}")]
    NotFound(BookId),

    #[error("analysis provider failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("analysis record already exists for book {book_id} ({kind})")]
    Conflict { book_id: BookId, kind: AnalysisKind },

    #[error("storage error: {0}")]
    Storage(String),
}

impl AnalysisError {
    pub fn storage(err: impl std::fmt::Display) -> Self {
        AnalysisError::Storage(err.to_string())
    }
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;
