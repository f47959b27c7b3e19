//! SQLite-backed [`AnalysisStore`] and [`BookRepository`] implementations.
//!
//! The uniqueness invariant of the analysis cache is enforced by the
//! schema (`UNIQUE(book_id, kind)`, see [`migrate`](crate::migrate)):
//! `Create` puts surface a unique violation as
//! [`AnalysisError::Conflict`], `Overwrite` puts upsert.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use gutenberg_analyst_core::store::{check_payload_kind, AnalysisStore, BookRepository, PutMode};
use gutenberg_analyst_core::{
    AnalysisError, AnalysisKind, AnalysisPayload, AnalysisRecord, AnalysisResult, Book, BookId,
    BookSummary, Fingerprint,
};

fn db_err(e: sqlx::Error) -> AnalysisError {
    AnalysisError::storage(e)
}

fn from_ts(ts: i64) -> AnalysisResult<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0)
        .ok_or_else(|| AnalysisError::Storage(format!("invalid stored timestamp: {}", ts)))
}

fn book_id_from_row(row: &SqliteRow) -> AnalysisResult<BookId> {
    let raw: i64 = row.try_get("book_id").map_err(db_err)?;
    BookId::try_from(raw)
        .map_err(|_| AnalysisError::Storage(format!("invalid stored book id: {}", raw)))
}

/// SQLite implementation of [`AnalysisStore`].
#[derive(Clone)]
pub struct SqliteAnalysisStore {
    pool: SqlitePool,
}

impl SqliteAnalysisStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn record_from_row(row: &SqliteRow) -> AnalysisResult<AnalysisRecord> {
        let book_id = book_id_from_row(row)?;
        let kind_str: String = row.try_get("kind").map_err(db_err)?;
        let kind = kind_str.parse::<AnalysisKind>().map_err(AnalysisError::storage)?;
        let payload_json: String = row.try_get("payload_json").map_err(db_err)?;
        let payload = AnalysisPayload::from_json(kind, &payload_json).map_err(|e| {
            AnalysisError::Storage(format!(
                "corrupt cached {} payload for book {}: {}",
                kind, book_id, e
            ))
        })?;
        let fingerprint: String = row.try_get("fingerprint").map_err(db_err)?;
        let created_at: i64 = row.try_get("created_at").map_err(db_err)?;

        Ok(AnalysisRecord {
            book_id,
            kind,
            payload,
            fingerprint: Fingerprint::from_hex(fingerprint),
            created_at: from_ts(created_at)?,
        })
    }
}

#[async_trait]
impl AnalysisStore for SqliteAnalysisStore {
    async fn lookup(
        &self,
        book_id: BookId,
        kind: AnalysisKind,
    ) -> AnalysisResult<Option<AnalysisRecord>> {
        let row = sqlx::query(
            "SELECT book_id, kind, payload_json, fingerprint, created_at FROM analyses WHERE book_id = ? AND kind = ?",
        )
        .bind(i64::from(book_id))
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(Self::record_from_row).transpose()
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
        let payload_json = payload.to_json().map_err(AnalysisError::storage)?;
        // Second precision, matching what is read back.
        let created_at = from_ts(Utc::now().timestamp())?;

        let sql = match mode {
            PutMode::Create => {
                r#"
                INSERT INTO analyses (book_id, kind, payload_json, fingerprint, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#
            }
            PutMode::Overwrite => {
                r#"
                INSERT INTO analyses (book_id, kind, payload_json, fingerprint, created_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(book_id, kind) DO UPDATE SET
                    payload_json = excluded.payload_json,
                    fingerprint = excluded.fingerprint,
                    created_at = excluded.created_at
                "#
            }
        };

        let result = sqlx::query(sql)
            .bind(i64::from(book_id))
            .bind(kind.as_str())
            .bind(&payload_json)
            .bind(fingerprint.as_str())
            .bind(created_at.timestamp())
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(AnalysisRecord {
                book_id,
                kind,
                payload,
                fingerprint,
                created_at,
            }),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(AnalysisError::Conflict { book_id, kind })
            }
            Err(e) => Err(db_err(e)),
        }
    }

    async fn invalidate(&self, book_id: BookId, kind: AnalysisKind) -> AnalysisResult<bool> {
        let result = sqlx::query("DELETE FROM analyses WHERE book_id = ? AND kind = ?")
            .bind(i64::from(book_id))
            .bind(kind.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_for_book(&self, book_id: BookId) -> AnalysisResult<Vec<AnalysisRecord>> {
        let rows = sqlx::query(
            "SELECT book_id, kind, payload_json, fingerprint, created_at FROM analyses WHERE book_id = ?",
        )
        .bind(i64::from(book_id))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut records = rows
            .iter()
            .map(Self::record_from_row)
            .collect::<AnalysisResult<Vec<_>>>()?;
        records.sort_by_key(|r| r.kind);
        Ok(records)
    }
}

/// SQLite implementation of [`BookRepository`].
#[derive(Clone)]
pub struct SqliteBookRepository {
    pool: SqlitePool,
}

impl SqliteBookRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BookRepository for SqliteBookRepository {
    async fn get_book(&self, id: BookId) -> AnalysisResult<Book> {
        let row = sqlx::query(
            "SELECT book_id, title, author, language, download_count, content, retrieved_at FROM books WHERE book_id = ?",
        )
        .bind(i64::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or(AnalysisError::NotFound(id))?;

        let retrieved_at: i64 = row.try_get("retrieved_at").map_err(db_err)?;
        Ok(Book {
            id: book_id_from_row(&row)?,
            title: row.try_get("title").map_err(db_err)?,
            author: row.try_get("author").map_err(db_err)?,
            language: row.try_get("language").map_err(db_err)?,
            download_count: row.try_get("download_count").map_err(db_err)?,
            content: row.try_get("content").map_err(db_err)?,
            retrieved_at: from_ts(retrieved_at)?,
        })
    }

    async fn list_books(&self) -> AnalysisResult<Vec<BookSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT book_id, title, author, language, download_count,
                   LENGTH(CAST(content AS BLOB)) AS content_bytes, retrieved_at
            FROM books
            ORDER BY retrieved_at DESC, book_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|row| {
                let content_bytes: i64 = row.try_get("content_bytes").map_err(db_err)?;
                let retrieved_at: i64 = row.try_get("retrieved_at").map_err(db_err)?;
                Ok(BookSummary {
                    id: book_id_from_row(row)?,
                    title: row.try_get("title").map_err(db_err)?,
                    author: row.try_get("author").map_err(db_err)?,
                    language: row.try_get("language").map_err(db_err)?,
                    download_count: row.try_get("download_count").map_err(db_err)?,
                    content_bytes: usize::try_from(content_bytes).unwrap_or(0),
                    retrieved_at: from_ts(retrieved_at)?,
                })
            })
            .collect()
    }

    async fn put_book(&self, book: &Book) -> AnalysisResult<()> {
        sqlx::query(
            r#"
            INSERT INTO books (book_id, title, author, language, download_count, content, retrieved_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(book_id) DO UPDATE SET
                title = excluded.title,
                author = excluded.author,
                language = COALESCE(excluded.language, books.language),
                download_count = excluded.download_count,
                content = excluded.content,
                retrieved_at = excluded.retrieved_at
            "#,
        )
        .bind(i64::from(book.id))
        .bind(&book.title)
        .bind(&book.author)
        .bind(&book.language)
        .bind(book.download_count)
        .bind(&book.content)
        .bind(book.retrieved_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn set_language_if_missing(&self, id: BookId, language: &str) -> AnalysisResult<bool> {
        let result = sqlx::query(
            "UPDATE books SET language = ? WHERE book_id = ? AND (language IS NULL OR TRIM(language) = '')",
        )
        .bind(language)
        .bind(i64::from(id))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        // Distinguish "already set" from "no such book".
        self.get_book(id).await.map(|_| false)
    }
}
