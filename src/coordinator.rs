//! Analysis coordinator.
//!
//! Serves analyses from the cache, computes them on a miss, and makes sure
//! at most one provider call is in flight per `(book_id, kind)`.
//!
//! # Flow
//!
//! ```text
//! get_analysis(book_id, kind)
//!   ├── get_book          → NotFound
//!   ├── normalize + fingerprint
//!   ├── lookup            → fresh hit: return
//!   └── slot map entry
//!         ├── vacant   → holder: spawn computation, wait
//!         └── occupied → joiner: wait on the same computation
//! ```
//!
//! The computation runs in its own task. Callers only wait on a
//! [`watch`] channel, so a caller that gives up (dropped future, client
//! disconnect) never cancels the provider call or the cache write.
//!
//! The slot entry is removed by a drop guard before the outcome is
//! published, on success, failure, and task abort alike.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use gutenberg_analyst_core::provider::AnalysisProvider;
use gutenberg_analyst_core::store::{AnalysisStore, BookRepository, PutMode};
use gutenberg_analyst_core::{
    AnalysisError, AnalysisKind, AnalysisRecord, AnalysisResult, Book, BookId, ContentBound,
    Fingerprint, ProviderError,
};

type Outcome = AnalysisResult<AnalysisRecord>;
type SlotKey = (BookId, AnalysisKind);
type Slots = DashMap<SlotKey, watch::Receiver<Option<Outcome>>>;

pub struct AnalysisCoordinator {
    books: Arc<dyn BookRepository>,
    store: Arc<dyn AnalysisStore>,
    provider: Arc<dyn AnalysisProvider>,
    bound: ContentBound,
    timeout: Duration,
    slots: Arc<Slots>,
}

impl AnalysisCoordinator {
    pub fn new(
        books: Arc<dyn BookRepository>,
        store: Arc<dyn AnalysisStore>,
        provider: Arc<dyn AnalysisProvider>,
        bound: ContentBound,
        timeout: Duration,
    ) -> Self {
        Self {
            books,
            store,
            provider,
            bound,
            timeout,
            slots: Arc::new(DashMap::new()),
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Number of computations currently in flight.
    pub fn in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Cached analysis of `kind` for `book_id`, computing it if missing or stale.
    ///
    /// # Errors
    ///
    /// - [`AnalysisError::NotFound`] if the book is unknown (no provider call).
    /// - [`AnalysisError::Provider`] if the computation failed or timed out;
    ///   nothing is written in that case.
    pub async fn get_analysis(&self, book_id: BookId, kind: AnalysisKind) -> Outcome {
        let mut book = self.books.get_book(book_id).await?;
        let kept = self.bound.normalize(&book.content).len();
        book.content.truncate(kept);
        let fingerprint = Fingerprint::of(&book.content);

        if let Some(record) = self.store.lookup(book_id, kind).await? {
            if record.is_fresh_for(&fingerprint) {
                return Ok(record);
            }
        }

        let rx = self.acquire_or_join(book, kind, fingerprint);
        wait_for_outcome(rx).await
    }

    /// Drop the cached record. Returns whether one existed.
    pub async fn invalidate(&self, book_id: BookId, kind: AnalysisKind) -> AnalysisResult<bool> {
        self.store.invalidate(book_id, kind).await
    }

    /// All cached records for a known book.
    pub async fn list_analyses(&self, book_id: BookId) -> AnalysisResult<Vec<AnalysisRecord>> {
        self.books.get_book(book_id).await?;
        self.store.list_for_book(book_id).await
    }

    fn acquire_or_join(
        &self,
        book: Book,
        kind: AnalysisKind,
        fingerprint: Fingerprint,
    ) -> watch::Receiver<Option<Outcome>> {
        let key = (book.id, kind);
        let (tx, rx) = match self.slots.entry(key) {
            Entry::Occupied(slot) => return slot.get().clone(),
            Entry::Vacant(slot) => {
                let (tx, rx) = watch::channel(None);
                slot.insert(rx.clone());
                (tx, rx)
            }
        };

        let computation = Computation {
            store: Arc::clone(&self.store),
            provider: Arc::clone(&self.provider),
            timeout: self.timeout,
            book,
            kind,
            fingerprint,
        };
        let release = SlotRelease {
            slots: Arc::clone(&self.slots),
            key,
        };

        tokio::spawn(async move {
            let outcome = computation.run().await;
            drop(release);
            tx.send_replace(Some(outcome));
        });

        rx
    }
}

async fn wait_for_outcome(mut rx: watch::Receiver<Option<Outcome>>) -> Outcome {
    match rx.wait_for(Option::is_some).await {
        Ok(outcome) => (*outcome)
            .clone()
            .unwrap_or_else(|| Err(ProviderError::Aborted.into())),
        // Sender dropped without publishing: the task was aborted.
        Err(_) => Err(ProviderError::Aborted.into()),
    }
}

/// Removes the slot entry when the computation ends, however it ends.
struct SlotRelease {
    slots: Arc<Slots>,
    key: SlotKey,
}

impl Drop for SlotRelease {
    fn drop(&mut self) {
        self.slots.remove(&self.key);
    }
}

struct Computation {
    store: Arc<dyn AnalysisStore>,
    provider: Arc<dyn AnalysisProvider>,
    timeout: Duration,
    book: Book,
    kind: AnalysisKind,
    fingerprint: Fingerprint,
}

impl Computation {
    async fn run(self) -> Outcome {
        let book_id = self.book.id;
        let kind = self.kind;

        // A computation that finished after our first lookup may already
        // have written a fresh record.
        let mode = match self.store.lookup(book_id, kind).await? {
            Some(record) if record.is_fresh_for(&self.fingerprint) => return Ok(record),
            Some(_) => PutMode::Overwrite,
            None => PutMode::Create,
        };

        let analysis = self.provider.analyze(kind, &self.book);
        let payload = match tokio::time::timeout(self.timeout, analysis).await {
            Ok(result) => result?,
            Err(_) => return Err(ProviderError::Timeout(self.timeout).into()),
        };
        if payload.kind() != kind {
            return Err(ProviderError::MalformedResponse(format!(
                "provider returned a {} payload for a {} request",
                payload.kind(),
                kind
            ))
            .into());
        }

        let fingerprint = self.fingerprint.clone();
        match self
            .store
            .put(book_id, kind, payload.clone(), fingerprint.clone(), mode)
            .await
        {
            // Another writer sharing the store got there first.
            Err(AnalysisError::Conflict { .. }) => {
                match self.store.lookup(book_id, kind).await? {
                    Some(record) if record.is_fresh_for(&fingerprint) => Ok(record),
                    // Stale or already removed: our payload matches the
                    // current text, so it replaces whatever is there.
                    _ => {
                        self.store
                            .put(book_id, kind, payload, fingerprint, PutMode::Overwrite)
                            .await
                    }
                }
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use gutenberg_analyst_core::models::{LanguageAnalysis, PlotAnalysis};
    use gutenberg_analyst_core::store::memory::{InMemoryAnalysisStore, InMemoryBookRepository};
    use gutenberg_analyst_core::AnalysisPayload;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider that counts calls, sleeps, then answers with a plot
    /// summary naming the first words of the text it was given.
    struct MockProvider {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl MockProvider {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay: Duration::from_millis(20),
                fail: true,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AnalysisProvider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        async fn analyze(
            &self,
            kind: AnalysisKind,
            book: &Book,
        ) -> Result<AnalysisPayload, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(ProviderError::RateLimited("slow down".to_string()));
            }
            Ok(match kind {
                AnalysisKind::Language => AnalysisPayload::Language(LanguageAnalysis {
                    language: "English".to_string(),
                    confidence: 0.9,
                }),
                _ => AnalysisPayload::Plot(PlotAnalysis {
                    summary: book.content.clone(),
                    key_events: vec![],
                }),
            })
        }
    }

    fn book(id: BookId, content: &str) -> Book {
        Book {
            id,
            title: Some("Frankenstein".to_string()),
            author: Some("Mary Shelley".to_string()),
            language: None,
            download_count: None,
            content: content.to_string(),
            retrieved_at: Utc::now(),
        }
    }

    struct Fixture {
        books: Arc<InMemoryBookRepository>,
        store: Arc<InMemoryAnalysisStore>,
        provider: Arc<MockProvider>,
        coordinator: Arc<AnalysisCoordinator>,
    }

    fn fixture(provider: Arc<MockProvider>, timeout: Duration, bound: ContentBound) -> Fixture {
        let books = Arc::new(InMemoryBookRepository::with_books([
            book(7, "It was a dark and stormy night."),
            book(84, "You will rejoice to hear that no disaster has accompanied..."),
        ]));
        let store = Arc::new(InMemoryAnalysisStore::new());
        let coordinator = Arc::new(AnalysisCoordinator::new(
            books.clone(),
            store.clone(),
            provider.clone(),
            bound,
            timeout,
        ));
        Fixture {
            books,
            store,
            provider,
            coordinator,
        }
    }

    fn default_fixture(delay: Duration) -> Fixture {
        fixture(MockProvider::new(delay), Duration::from_secs(5), ContentBound::default())
    }

    #[tokio::test]
    async fn test_two_concurrent_calls_make_one_provider_call() {
        let f = default_fixture(Duration::from_millis(50));
        let (a, b) = tokio::join!(
            f.coordinator.get_analysis(7, AnalysisKind::Plot),
            f.coordinator.get_analysis(7, AnalysisKind::Plot),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(f.provider.calls(), 1);
        assert_eq!(a, b);
        assert_eq!(f.store.len(), 1);
        assert_eq!(f.coordinator.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_many_concurrent_calls_across_threads() {
        let f = default_fixture(Duration::from_millis(50));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = Arc::clone(&f.coordinator);
                tokio::spawn(async move { c.get_analysis(7, AnalysisKind::Plot).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(f.provider.calls(), 1);
        assert_eq!(f.store.len(), 1);
    }

    #[tokio::test]
    async fn test_different_keys_compute_independently() {
        let f = default_fixture(Duration::from_millis(10));
        let (a, b, c) = tokio::join!(
            f.coordinator.get_analysis(7, AnalysisKind::Plot),
            f.coordinator.get_analysis(7, AnalysisKind::Language),
            f.coordinator.get_analysis(84, AnalysisKind::Plot),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(f.provider.calls(), 3);
        assert_eq!(f.store.len(), 3);
    }

    #[tokio::test]
    async fn test_fresh_cached_record_skips_provider() {
        let f = default_fixture(Duration::ZERO);
        let first = f.coordinator.get_analysis(84, AnalysisKind::Plot).await.unwrap();
        let second = f.coordinator.get_analysis(84, AnalysisKind::Plot).await.unwrap();
        assert_eq!(f.provider.calls(), 1);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_changed_content_is_recomputed_and_overwritten() {
        let f = default_fixture(Duration::ZERO);
        let old = f.coordinator.get_analysis(84, AnalysisKind::Plot).await.unwrap();

        f.books.put_book(&book(84, "A revised edition.")).await.unwrap();
        let new = f.coordinator.get_analysis(84, AnalysisKind::Plot).await.unwrap();

        assert_eq!(f.provider.calls(), 2);
        assert_ne!(old.fingerprint, new.fingerprint);
        assert_eq!(new.fingerprint, Fingerprint::of("A revised edition."));
        assert_eq!(f.store.len(), 1);
        let stored = f.store.lookup(84, AnalysisKind::Plot).await.unwrap().unwrap();
        assert_eq!(stored, new);
    }

    #[tokio::test]
    async fn test_unknown_book_is_not_found_without_side_effects() {
        let f = default_fixture(Duration::ZERO);
        let err = f
            .coordinator
            .get_analysis(999_999, AnalysisKind::Characters)
            .await
            .unwrap_err();
        assert_eq!(err, AnalysisError::NotFound(999_999));
        assert_eq!(f.provider.calls(), 0);
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn test_provider_failure_reaches_all_waiters_and_writes_nothing() {
        let f = fixture(MockProvider::failing(), Duration::from_secs(5), ContentBound::default());
        let (a, b) = tokio::join!(
            f.coordinator.get_analysis(7, AnalysisKind::Plot),
            f.coordinator.get_analysis(7, AnalysisKind::Plot),
        );
        let expected = AnalysisError::Provider(ProviderError::RateLimited("slow down".to_string()));
        assert_eq!(a.unwrap_err(), expected);
        assert_eq!(b.unwrap_err(), expected);
        assert_eq!(f.provider.calls(), 1);
        assert!(f.store.is_empty());
        assert_eq!(f.coordinator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_provider_failure_keeps_stale_record() {
        let good = default_fixture(Duration::ZERO);
        let stale = good.coordinator.get_analysis(84, AnalysisKind::Plot).await.unwrap();

        let failing = AnalysisCoordinator::new(
            good.books.clone(),
            good.store.clone(),
            MockProvider::failing(),
            ContentBound::default(),
            Duration::from_secs(5),
        );
        good.books.put_book(&book(84, "Changed.")).await.unwrap();
        assert!(failing.get_analysis(84, AnalysisKind::Plot).await.is_err());

        let stored = good.store.lookup(84, AnalysisKind::Plot).await.unwrap().unwrap();
        assert_eq!(stored, stale);
    }

    #[tokio::test]
    async fn test_timeout_is_provider_failure() {
        let timeout = Duration::from_millis(50);
        let f = fixture(
            MockProvider::new(Duration::from_secs(5)),
            timeout,
            ContentBound::default(),
        );
        let err = f.coordinator.get_analysis(7, AnalysisKind::Plot).await.unwrap_err();
        assert_eq!(err, AnalysisError::Provider(ProviderError::Timeout(timeout)));
        assert!(f.store.is_empty());
        assert_eq!(f.coordinator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_caller_does_not_cancel_computation() {
        let f = default_fixture(Duration::from_millis(50));
        let c = Arc::clone(&f.coordinator);
        let handle = tokio::spawn(async move { c.get_analysis(7, AnalysisKind::Plot).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.abort();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(f.store.lookup(7, AnalysisKind::Plot).await.unwrap().is_some());
        assert_eq!(f.coordinator.in_flight(), 0);

        f.coordinator.get_analysis(7, AnalysisKind::Plot).await.unwrap();
        assert_eq!(f.provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_provider_sees_normalized_text() {
        let f = fixture(
            MockProvider::new(Duration::ZERO),
            Duration::from_secs(5),
            ContentBound::new(10),
        );
        let record = f.coordinator.get_analysis(7, AnalysisKind::Plot).await.unwrap();
        assert_eq!(
            record.payload,
            AnalysisPayload::Plot(PlotAnalysis {
                summary: "It was a d".to_string(),
                key_events: vec![],
            })
        );
        assert_eq!(record.fingerprint, Fingerprint::of("It was a d"));
    }

    #[tokio::test]
    async fn test_invalidate_forces_recompute() {
        let f = default_fixture(Duration::ZERO);
        f.coordinator.get_analysis(7, AnalysisKind::Language).await.unwrap();
        assert!(f.coordinator.invalidate(7, AnalysisKind::Language).await.unwrap());
        assert!(!f.coordinator.invalidate(7, AnalysisKind::Language).await.unwrap());
        f.coordinator.get_analysis(7, AnalysisKind::Language).await.unwrap();
        assert_eq!(f.provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_list_analyses() {
        let f = default_fixture(Duration::ZERO);
        f.coordinator.get_analysis(7, AnalysisKind::Plot).await.unwrap();
        f.coordinator.get_analysis(7, AnalysisKind::Language).await.unwrap();
        let kinds: Vec<_> = f
            .coordinator
            .list_analyses(7)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.kind)
            .collect();
        assert_eq!(kinds, vec![AnalysisKind::Language, AnalysisKind::Plot]);
        assert_eq!(
            f.coordinator.list_analyses(404).await.unwrap_err(),
            AnalysisError::NotFound(404)
        );
    }

    /// Store that lets a competing writer insert `competitor` right before
    /// the first `Create` put lands.
    struct RacingStore {
        inner: InMemoryAnalysisStore,
        competitor: std::sync::Mutex<Option<(AnalysisPayload, Fingerprint)>>,
    }

    impl RacingStore {
        fn new(payload: AnalysisPayload, fingerprint: Fingerprint) -> Arc<Self> {
            Arc::new(Self {
                inner: InMemoryAnalysisStore::new(),
                competitor: std::sync::Mutex::new(Some((payload, fingerprint))),
            })
        }
    }

    #[async_trait]
    impl AnalysisStore for RacingStore {
        async fn lookup(
            &self,
            book_id: BookId,
            kind: AnalysisKind,
        ) -> AnalysisResult<Option<AnalysisRecord>> {
            self.inner.lookup(book_id, kind).await
        }

        async fn put(
            &self,
            book_id: BookId,
            kind: AnalysisKind,
            payload: AnalysisPayload,
            fingerprint: Fingerprint,
            mode: PutMode,
        ) -> AnalysisResult<AnalysisRecord> {
            let competing = match mode {
                PutMode::Create => self.competitor.lock().unwrap().take(),
                PutMode::Overwrite => None,
            };
            if let Some((other, other_fp)) = competing {
                self.inner
                    .put(book_id, kind, other, other_fp, PutMode::Create)
                    .await?;
            }
            self.inner.put(book_id, kind, payload, fingerprint, mode).await
        }

        async fn invalidate(&self, book_id: BookId, kind: AnalysisKind) -> AnalysisResult<bool> {
            self.inner.invalidate(book_id, kind).await
        }

        async fn list_for_book(&self, book_id: BookId) -> AnalysisResult<Vec<AnalysisRecord>> {
            self.inner.list_for_book(book_id).await
        }
    }

    fn racing_coordinator(
        store: Arc<RacingStore>,
        provider: Arc<MockProvider>,
    ) -> AnalysisCoordinator {
        let books = Arc::new(InMemoryBookRepository::with_books([book(
            7,
            "It was a dark and stormy night.",
        )]));
        AnalysisCoordinator::new(
            books,
            store,
            provider,
            ContentBound::default(),
            Duration::from_secs(5),
        )
    }

    fn other_plot() -> AnalysisPayload {
        AnalysisPayload::Plot(PlotAnalysis {
            summary: "Written by another process.".to_string(),
            key_events: vec![],
        })
    }

    #[tokio::test]
    async fn test_lost_create_race_returns_fresh_competing_record() {
        let current = Fingerprint::of("It was a dark and stormy night.");
        let store = RacingStore::new(other_plot(), current.clone());
        let provider = MockProvider::new(Duration::ZERO);
        let coordinator = racing_coordinator(store.clone(), provider.clone());

        let record = coordinator.get_analysis(7, AnalysisKind::Plot).await.unwrap();

        assert_eq!(record.payload, other_plot());
        assert_eq!(record.fingerprint, current);
        assert_eq!(provider.calls(), 1);
        assert_eq!(store.inner.len(), 1);
    }

    #[tokio::test]
    async fn test_lost_create_race_overwrites_stale_competing_record() {
        let store = RacingStore::new(other_plot(), Fingerprint::of("An older edition."));
        let provider = MockProvider::new(Duration::ZERO);
        let coordinator = racing_coordinator(store.clone(), provider.clone());

        let record = coordinator.get_analysis(7, AnalysisKind::Plot).await.unwrap();

        let current = Fingerprint::of("It was a dark and stormy night.");
        assert_eq!(record.fingerprint, current);
        assert_eq!(
            record.payload,
            AnalysisPayload::Plot(PlotAnalysis {
                summary: "It was a dark and stormy night.".to_string(),
                key_events: vec![],
            })
        );
        let stored = store.inner.lookup(7, AnalysisKind::Plot).await.unwrap().unwrap();
        assert_eq!(stored, record);
        assert_eq!(store.inner.len(), 1);
        assert_eq!(provider.calls(), 1);
    }
}
