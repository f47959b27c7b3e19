//! External analysis provider abstraction.
//!
//! A provider turns a book's normalized text into a structured
//! [`AnalysisPayload`] of the requested kind. Providers are network-backed,
//! rate-limited, and untrusted; callers bound every call with a timeout and
//! never retry on their own.

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::models::{AnalysisKind, AnalysisPayload, Book};

#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    /// Short identifier for diagnostics (e.g. `"groq:llama3-70b-8192"`).
    fn name(&self) -> &str;

    /// Analyze `book` (whose content is already normalized).
    ///
    /// The returned payload must be of `kind`.
    async fn analyze(
        &self,
        kind: AnalysisKind,
        book: &Book,
    ) -> Result<AnalysisPayload, ProviderError>;
}
