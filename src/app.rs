//! Application wiring.
//!
//! [`App`] owns the database pool and every collaborator the CLI and the
//! HTTP server need: the book repository, the analysis coordinator, and the
//! Gutenberg client. It is built once per process by [`App::open`] and shut
//! down with [`App::close`]; tests assemble one from in-memory parts with
//! [`App::from_parts`].

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;

use gutenberg_analyst_core::provider::AnalysisProvider;
use gutenberg_analyst_core::store::{AnalysisStore, BookRepository};
use gutenberg_analyst_core::{
    AnalysisError, AnalysisKind, AnalysisPayload, AnalysisRecord, AnalysisResult, Book, BookId,
    BookSummary,
};

use crate::config::Config;
use crate::coordinator::AnalysisCoordinator;
use crate::gutenberg::GutenbergClient;
use crate::provider::{create_provider, DisabledProvider};
use crate::sqlite_store::{SqliteAnalysisStore, SqliteBookRepository};
use crate::{db, migrate};

pub struct App {
    pub config: Arc<Config>,
    pool: Option<SqlitePool>,
    books: Arc<dyn BookRepository>,
    coordinator: AnalysisCoordinator,
    gutenberg: GutenbergClient,
}

impl App {
    /// Connect to the configured database, apply migrations, and build the
    /// provider.
    ///
    /// A provider that cannot be built (typically a missing API key) is
    /// replaced by [`DisabledProvider`] with a warning, so commands that
    /// never analyze keep working.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;

        let provider = create_provider(&config.provider).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "analysis provider unavailable; analyses will fail");
            Arc::new(DisabledProvider)
        });

        let books: Arc<dyn BookRepository> = Arc::new(SqliteBookRepository::new(pool.clone()));
        let store: Arc<dyn AnalysisStore> = Arc::new(SqliteAnalysisStore::new(pool.clone()));

        let mut app = Self::from_parts(config.clone(), books, store, provider)?;
        app.pool = Some(pool);
        Ok(app)
    }

    pub fn from_parts(
        config: Config,
        books: Arc<dyn BookRepository>,
        store: Arc<dyn AnalysisStore>,
        provider: Arc<dyn AnalysisProvider>,
    ) -> Result<Self> {
        let bound = config.content.bound();
        let gutenberg = GutenbergClient::new(&config.gutenberg, bound)?;
        let coordinator = AnalysisCoordinator::new(
            Arc::clone(&books),
            store,
            provider,
            bound,
            config.provider.timeout(),
        );
        Ok(Self {
            config: Arc::new(config),
            pool: None,
            books,
            coordinator,
            gutenberg,
        })
    }

    pub async fn close(self) {
        if let Some(pool) = self.pool {
            pool.close().await;
        }
    }

    pub fn provider_name(&self) -> &str {
        self.coordinator.provider_name()
    }

    pub async fn list_books(&self) -> AnalysisResult<Vec<BookSummary>> {
        self.books.list_books().await
    }

    /// The stored book, or download and store it.
    ///
    /// With `refresh`, the book is always downloaded again and its stored
    /// content replaced; cached analyses become stale and are recomputed
    /// on their next request.
    pub async fn get_or_fetch(&self, id: BookId, refresh: bool) -> AnalysisResult<Book> {
        if !refresh {
            match self.books.get_book(id).await {
                Err(AnalysisError::NotFound(_)) => {}
                other => return other,
            }
        }

        tracing::info!(book_id = id, refresh, "downloading book");
        let book = self
            .gutenberg
            .fetch_book(id)
            .await
            .ok_or(AnalysisError::NotFound(id))?;
        self.books.put_book(&book).await?;
        // Re-read so a preserved language is reflected.
        self.books.get_book(id).await
    }

    /// Cached or freshly computed analysis of a stored book.
    pub async fn analyze(&self, id: BookId, kind: AnalysisKind) -> AnalysisResult<AnalysisRecord> {
        let record = self.coordinator.get_analysis(id, kind).await?;

        if let AnalysisPayload::Language(detected) = &record.payload {
            match self.books.set_language_if_missing(id, &detected.language).await {
                Ok(true) => tracing::info!(
                    book_id = id,
                    language = %detected.language,
                    "recorded detected language"
                ),
                Ok(false) => {}
                Err(e) => tracing::warn!(
                    book_id = id,
                    error = %e,
                    "failed to record detected language"
                ),
            }
        }

        Ok(record)
    }

    pub async fn list_analyses(&self, id: BookId) -> AnalysisResult<Vec<AnalysisRecord>> {
        self.coordinator.list_analyses(id).await
    }

    pub async fn invalidate(&self, id: BookId, kind: AnalysisKind) -> AnalysisResult<bool> {
        let removed = self.coordinator.invalidate(id, kind).await?;
        tracing::info!(book_id = id, %kind, removed, "invalidated analysis");
        Ok(removed)
    }
}
