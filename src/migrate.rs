use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the database and its schema. Idempotent.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // Books keyed by Gutenberg ebook number
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS books (
            book_id INTEGER PRIMARY KEY,
            title TEXT,
            author TEXT,
            language TEXT,
            download_count INTEGER,
            content TEXT NOT NULL,
            retrieved_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One cached analysis per (book, kind)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analyses (
            book_id INTEGER NOT NULL,
            kind TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(book_id, kind),
            FOREIGN KEY (book_id) REFERENCES books(book_id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_books_retrieved_at ON books(retrieved_at DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_analyses_book_id ON analyses(book_id)")
        .execute(pool)
        .await?;

    Ok(())
}
