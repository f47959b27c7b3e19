//! In-memory store implementations for tests and embedding.
//!
//! Uses `HashMap` behind `std::sync::RwLock`. Each `put` holds the write
//! lock across its existence check and insert, so `Create` mode is atomic.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{AnalysisError, AnalysisResult};
use crate::fingerprint::Fingerprint;
use crate::models::{AnalysisKind, AnalysisPayload, AnalysisRecord, Book, BookId, BookSummary};

use super::{check_payload_kind, AnalysisStore, BookRepository, PutMode};

fn poisoned<T>(_: T) -> AnalysisError {
    AnalysisError::storage("in-memory store lock poisoned")
}

/// In-memory analysis cache.
#[derive(Default)]
pub struct InMemoryAnalysisStore {
    records: RwLock<HashMap<(BookId, AnalysisKind), AnalysisRecord>>,
}

impl InMemoryAnalysisStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached records.
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AnalysisStore for InMemoryAnalysisStore {
    async fn lookup(
        &self,
        book_id: BookId,
        kind: AnalysisKind,
    ) -> AnalysisResult<Option<AnalysisRecord>> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.get(&(book_id, kind)).cloned())
    }

    async fn put(
        &self,
        book_id: BookId,
        kind: AnalysisKind,
        payload: AnalysisPayload,
        fingerprint: Fingerprint,
        mode: PutMode,
    ) -> AnalysisResult<AnalysisRecord> {
        check_payload_kind(kind, &payload)?;
        let mut records = self.records.write().map_err(poisoned)?;
        if mode == PutMode::Create && records.contains_key(&(book_id, kind)) {
            return Err(AnalysisError::Conflict { book_id, kind });
        }
        let record = AnalysisRecord {
            book_id,
            kind,
            payload,
            fingerprint,
            created_at: Utc::now(),
        };
        records.insert((book_id, kind), record.clone());
        Ok(record)
    }

    async fn invalidate(&self, book_id: BookId, kind: AnalysisKind) -> AnalysisResult<bool> {
        let mut records = self.records.write().map_err(poisoned)?;
        Ok(records.remove(&(book_id, kind)).is_some())
    }

    async fn list_for_book(&self, book_id: BookId) -> AnalysisResult<Vec<AnalysisRecord>> {
        let records = self.records.read().map_err(poisoned)?;
        let mut out: Vec<AnalysisRecord> = records
            .values()
            .filter(|r| r.book_id == book_id)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.kind);
        Ok(out)
    }
}

/// In-memory book repository.
#[derive(Default)]
pub struct InMemoryBookRepository {
    books: RwLock<HashMap<BookId, Book>>,
}

impl InMemoryBookRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository pre-populated with `books`.
    pub fn with_books(books: impl IntoIterator<Item = Book>) -> Self {
        let map = books.into_iter().map(|b| (b.id, b)).collect();
        Self {
            books: RwLock::new(map),
        }
    }
}

#[async_trait]
impl BookRepository for InMemoryBookRepository {
    async fn get_book(&self, id: BookId) -> AnalysisResult<Book> {
        let books = self.books.read().map_err(poisoned)?;
        books.get(&id).cloned().ok_or(AnalysisError::NotFound(id))
    }

    async fn list_books(&self) -> AnalysisResult<Vec<BookSummary>> {
        let books = self.books.read().map_err(poisoned)?;
        let mut out: Vec<BookSummary> = books.values().map(Book::summary).collect();
        out.sort_by(|a, b| b.retrieved_at.cmp(&a.retrieved_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn put_book(&self, book: &Book) -> AnalysisResult<()> {
        let mut books = self.books.write().map_err(poisoned)?;
        books.insert(book.id, book.clone());
        Ok(())
    }

    async fn set_language_if_missing(&self, id: BookId, language: &str) -> AnalysisResult<bool> {
        let mut books = self.books.write().map_err(poisoned)?;
        let book = books.get_mut(&id).ok_or(AnalysisError::NotFound(id))?;
        match book.language.as_deref() {
            Some(existing) if !existing.trim().is_empty() => Ok(false),
            _ => {
                book.language = Some(language.to_string());
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LanguageAnalysis, PlotAnalysis};
    use chrono::TimeZone;

    fn plot(summary: &str) -> AnalysisPayload {
        AnalysisPayload::Plot(PlotAnalysis {
            summary: summary.to_string(),
            key_events: vec!["Opening".to_string()],
        })
    }

    fn book(id: BookId, day: u32) -> Book {
        Book {
            id,
            title: Some(format!("Book {}", id)),
            author: None,
            language: None,
            download_count: None,
            content: "text".to_string(),
            retrieved_at: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_lookup_miss() {
        let store = InMemoryAnalysisStore::new();
        assert!(store.lookup(84, AnalysisKind::Plot).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_then_lookup() {
        let store = InMemoryAnalysisStore::new();
        let fp = Fingerprint::of("text");
        let rec = store
            .put(84, AnalysisKind::Plot, plot("A monster."), fp.clone(), PutMode::Create)
            .await
            .unwrap();
        let found = store.lookup(84, AnalysisKind::Plot).await.unwrap().unwrap();
        assert_eq!(found, rec);
        assert!(found.is_fresh_for(&fp));
    }

    #[tokio::test]
    async fn test_create_conflicts_on_existing_key() {
        let store = InMemoryAnalysisStore::new();
        let fp = Fingerprint::of("text");
        store
            .put(84, AnalysisKind::Plot, plot("first"), fp.clone(), PutMode::Create)
            .await
            .unwrap();
        let err = store
            .put(84, AnalysisKind::Plot, plot("second"), fp, PutMode::Create)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AnalysisError::Conflict {
                book_id: 84,
                kind: AnalysisKind::Plot
            }
        );
        assert_eq!(store.len(), 1);
        let kept = store.lookup(84, AnalysisKind::Plot).await.unwrap().unwrap();
        assert_eq!(kept.payload, plot("first"));
    }

    #[tokio::test]
    async fn test_overwrite_replaces_single_record() {
        let store = InMemoryAnalysisStore::new();
        store
            .put(84, AnalysisKind::Plot, plot("old"), Fingerprint::of("a"), PutMode::Create)
            .await
            .unwrap();
        store
            .put(84, AnalysisKind::Plot, plot("new"), Fingerprint::of("b"), PutMode::Overwrite)
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
        let rec = store.lookup(84, AnalysisKind::Plot).await.unwrap().unwrap();
        assert_eq!(rec.payload, plot("new"));
        assert_eq!(rec.fingerprint, Fingerprint::of("b"));
    }

    #[tokio::test]
    async fn test_put_rejects_mismatched_payload_kind() {
        let store = InMemoryAnalysisStore::new();
        let err = store
            .put(1, AnalysisKind::Language, plot("x"), Fingerprint::of("x"), PutMode::Create)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Storage(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate() {
        let store = InMemoryAnalysisStore::new();
        store
            .put(84, AnalysisKind::Plot, plot("x"), Fingerprint::of("x"), PutMode::Create)
            .await
            .unwrap();
        assert!(store.invalidate(84, AnalysisKind::Plot).await.unwrap());
        assert!(!store.invalidate(84, AnalysisKind::Plot).await.unwrap());
        assert!(store.lookup(84, AnalysisKind::Plot).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let store = InMemoryAnalysisStore::new();
        let fp = Fingerprint::of("x");
        store
            .put(84, AnalysisKind::Plot, plot("x"), fp.clone(), PutMode::Create)
            .await
            .unwrap();
        let lang = AnalysisPayload::Language(LanguageAnalysis {
            language: "English".to_string(),
            confidence: 0.99,
        });
        store
            .put(84, AnalysisKind::Language, lang, fp.clone(), PutMode::Create)
            .await
            .unwrap();
        store
            .put(11, AnalysisKind::Plot, plot("y"), fp, PutMode::Create)
            .await
            .unwrap();

        let for_84 = store.list_for_book(84).await.unwrap();
        let kinds: Vec<AnalysisKind> = for_84.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![AnalysisKind::Language, AnalysisKind::Plot]);
    }

    #[tokio::test]
    async fn test_book_repository_roundtrip() {
        let repo = InMemoryBookRepository::with_books(vec![book(1, 1), book(2, 5)]);
        assert_eq!(repo.get_book(2).await.unwrap().id, 2);
        assert_eq!(repo.get_book(3).await.unwrap_err(), AnalysisError::NotFound(3));

        let listed: Vec<BookId> = repo.list_books().await.unwrap().iter().map(|b| b.id).collect();
        assert_eq!(listed, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_set_language_only_when_missing() {
        let repo = InMemoryBookRepository::with_books(vec![book(1, 1)]);
        assert!(repo.set_language_if_missing(1, "English").await.unwrap());
        assert!(!repo.set_language_if_missing(1, "French").await.unwrap());
        assert_eq!(repo.get_book(1).await.unwrap().language.as_deref(), Some("English"));
        assert!(repo.set_language_if_missing(9, "English").await.is_err());
    }
}
