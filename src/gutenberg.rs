//! Project Gutenberg retrieval.
//!
//! Downloads the plain-text body of an ebook and scrapes its catalog page
//! for metadata. The body is normalized to the configured
//! [`ContentBound`] before it is handed back, so everything stored and
//! analyzed downstream is already bounded.
//!
//! # Sources
//!
//! | What | URL |
//! |------|-----|
//! | Text (tried in order) | `/files/{id}/{id}-0.txt`, `/files/{id}/{id}.txt`, `/cache/epub/{id}/pg{id}.txt` |
//! | Metadata | `/ebooks/{id}` (HTML) |

use anyhow::Result;
use chrono::Utc;
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::LazyLock;
use std::time::Duration;

use gutenberg_analyst_core::{Book, BookId, ContentBound};

use crate::config::GutenbergConfig;

static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));

/// Metadata scraped from an ebook's catalog page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub language: Option<String>,
    pub download_count: Option<i64>,
}

/// HTTP client for gutenberg.org (or a mirror).
#[derive(Clone)]
pub struct GutenbergClient {
    http: reqwest::Client,
    base_url: String,
    bound: ContentBound,
}

impl GutenbergClient {
    pub fn new(config: &GutenbergConfig, bound: ContentBound) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("gutenberg-analyst/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bound,
        })
    }

    fn content_urls(&self, id: BookId) -> [String; 3] {
        let base = &self.base_url;
        [
            format!("{}/files/{}/{}-0.txt", base, id, id),
            format!("{}/files/{}/{}.txt", base, id, id),
            format!("{}/cache/epub/{}/pg{}.txt", base, id, id),
        ]
    }

    /// Download the book's text, normalized. `None` if no source has it.
    pub async fn fetch_content(&self, id: BookId) -> Option<String> {
        for url in self.content_urls(id) {
            tracing::info!(%url, "fetching book content");
            match self.http.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => match resp.text().await {
                    Ok(text) => return Some(self.bounded(id, text)),
                    Err(e) => tracing::warn!(%url, error = %e, "failed to read book body"),
                },
                Ok(resp) => {
                    tracing::debug!(%url, status = %resp.status(), "content source unavailable")
                }
                Err(e) => tracing::warn!(%url, error = %e, "error fetching book content"),
            }
        }
        tracing::warn!(book_id = id, "no content source returned the book");
        None
    }

    fn bounded(&self, id: BookId, mut text: String) -> String {
        if self.bound.exceeded_by(&text) {
            let original = text.len();
            let kept = self.bound.normalize(&text).len();
            text.truncate(kept);
            tracing::warn!(
                book_id = id,
                original_bytes = original,
                kept_bytes = kept,
                "book content exceeds content bound; truncated"
            );
        }
        text
    }

    /// Scrape the catalog page. `None` if the page is unavailable.
    pub async fn fetch_metadata(&self, id: BookId) -> Option<BookMetadata> {
        let url = format!("{}/ebooks/{}", self.base_url, id);
        tracing::info!(%url, "fetching book metadata");
        let resp = match self.http.get(&url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(%url, error = %e, "error fetching book metadata");
                return None;
            }
        };
        if !resp.status().is_success() {
            tracing::warn!(%url, status = %resp.status(), "metadata page unavailable");
            return None;
        }
        match resp.text().await {
            Ok(html) => Some(parse_metadata(&html)),
            Err(e) => {
                tracing::warn!(%url, error = %e, "failed to read metadata page");
                None
            }
        }
    }

    /// Fetch text and metadata. `None` unless both are available.
    pub async fn fetch_book(&self, id: BookId) -> Option<Book> {
        let (content, metadata) = tokio::join!(self.fetch_content(id), self.fetch_metadata(id));
        let (content, metadata) = (content?, metadata?);
        Some(Book {
            id,
            title: metadata.title,
            author: metadata.author,
            language: metadata.language,
            download_count: metadata.download_count,
            content,
            retrieved_at: Utc::now(),
        })
    }
}

/// Extract title, author, language, and download count from a catalog page.
pub fn parse_metadata(html: &str) -> BookMetadata {
    let document = Html::parse_document(html);
    let mut meta = BookMetadata::default();

    if let Ok(sel) = Selector::parse("h1") {
        meta.title = document.select(&sel).next().and_then(|el| non_empty(el.text().collect()));
    }

    if let Ok(sel) = Selector::parse(r#"a[itemprop="creator"]"#) {
        meta.author = document.select(&sel).next().and_then(|el| non_empty(el.text().collect()));
    }

    // The bibliographic table has one <tr><th>Language</th><td>English</td></tr> row.
    if let (Ok(rows), Ok(th), Ok(td)) = (
        Selector::parse("tr"),
        Selector::parse("th"),
        Selector::parse("td"),
    ) {
        meta.language = document
            .select(&rows)
            .find(|row| {
                row.select(&th)
                    .next()
                    .map(|h| h.text().collect::<String>().contains("Language"))
                    .unwrap_or(false)
            })
            .and_then(|row| row.select(&td).next())
            .and_then(|cell| non_empty(cell.text().collect()));
    }

    if let Ok(sel) = Selector::parse(r#"td[itemprop="interactionCount"]"#) {
        meta.download_count = document.select(&sel).next().and_then(|el| {
            let text: String = el.text().collect();
            DIGITS.find(&text).and_then(|m| m.as_str().parse().ok())
        });
    }

    meta
}

fn non_empty(text: String) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
