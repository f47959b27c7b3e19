//! Storage abstractions for books and cached analyses.
//!
//! The [`AnalysisStore`] trait is the analysis cache: one record per
//! `(book_id, kind)`. The [`BookRepository`] trait owns book text and
//! metadata. Both are async (via `async-trait`) and `Send + Sync` so they
//! can be shared across request handlers as `Arc<dyn ...>`; the SQLite
//! implementations live in the `gutenberg-analyst` crate, the in-memory
//! ones in [`memory`].
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`lookup`](AnalysisStore::lookup) | Fetch the cached record for a key |
//! | [`put`](AnalysisStore::put) | Create or overwrite the record for a key |
//! | [`invalidate`](AnalysisStore::invalidate) | Remove the record for a key |
//! | [`list_for_book`](AnalysisStore::list_for_book) | All records of one book |

pub mod memory;

use async_trait::async_trait;

use crate::error::AnalysisResult;
use crate::fingerprint::Fingerprint;
use crate::models::{AnalysisKind, AnalysisPayload, AnalysisRecord, Book, BookId, BookSummary};

/// How [`AnalysisStore::put`] treats an existing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutMode {
    /// Fail with [`AnalysisError::Conflict`](crate::AnalysisError::Conflict)
    /// if a record already exists.
    Create,
    /// Replace any existing record.
    Overwrite,
}

/// The analysis cache.
///
/// Implementations must uphold the uniqueness invariant: at most one
/// record per `(book_id, kind)` at any observation point, including under
/// concurrent writers.
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Cached record for the key, if any. No side effects.
    async fn lookup(
        &self,
        book_id: BookId,
        kind: AnalysisKind,
    ) -> AnalysisResult<Option<AnalysisRecord>>;

    /// Store `payload` for the key and return the resulting record.
    ///
    /// `payload` must be of `kind`; a mismatch is a storage error.
    async fn put(
        &self,
        book_id: BookId,
        kind: AnalysisKind,
        payload: AnalysisPayload,
        fingerprint: Fingerprint,
        mode: PutMode,
    ) -> AnalysisResult<AnalysisRecord>;

    /// Remove the record for the key. Returns whether one existed.
    async fn invalidate(&self, book_id: BookId, kind: AnalysisKind) -> AnalysisResult<bool>;

    /// All cached records for `book_id`, ordered by kind.
    async fn list_for_book(&self, book_id: BookId) -> AnalysisResult<Vec<AnalysisRecord>>;
}

/// Book text and metadata.
#[async_trait]
pub trait BookRepository: Send + Sync {
    /// The stored book, or [`AnalysisError::NotFound`](crate::AnalysisError::NotFound).
    async fn get_book(&self, id: BookId) -> AnalysisResult<Book>;

    /// All stored books, most recently retrieved first.
    async fn list_books(&self) -> AnalysisResult<Vec<BookSummary>>;

    /// Insert a book, or replace content and metadata of an existing one.
    async fn put_book(&self, book: &Book) -> AnalysisResult<()>;

    /// Record a detected language unless the book already has one.
    ///
    /// Returns whether the book was updated.
    async fn set_language_if_missing(&self, id: BookId, language: &str) -> AnalysisResult<bool>;
}

/// Reject storing a payload under a different kind.
pub fn check_payload_kind(kind: AnalysisKind, payload: &AnalysisPayload) -> AnalysisResult<()> {
    if payload.kind() != kind {
        return Err(crate::AnalysisError::Storage(format!(
            "payload of kind {} cannot be stored under {}",
            payload.kind(),
            kind
        )));
    }
    Ok(())
}
