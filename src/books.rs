//! Book commands: `gba fetch`, `gba books`, `gba show`.

use anyhow::Result;

use gutenberg_analyst_core::normalize::sample;
use gutenberg_analyst_core::{BookId, BookSummary};

use crate::app::App;

const PREVIEW_CHARS: usize = 500;

/// Download a book (unless already stored) and print its metadata.
pub async fn run_fetch(app: &App, id: BookId, refresh: bool) -> Result<()> {
    let book = app.get_or_fetch(id, refresh).await?;
    print_metadata(&book.summary());
    Ok(())
}

pub async fn run_books(app: &App) -> Result<()> {
    let books = app.list_books().await?;
    if books.is_empty() {
        println!("No books stored.");
        return Ok(());
    }

    println!("{:<8} {:<40} {:<30} {:<10} {:>10}", "ID", "TITLE", "AUTHOR", "LANGUAGE", "BYTES");
    for b in &books {
        println!(
            "{:<8} {:<40} {:<30} {:<10} {:>10}",
            b.id,
            clip(b.title.as_deref().unwrap_or("(untitled)"), 40),
            clip(b.author.as_deref().unwrap_or("-"), 30),
            b.language.as_deref().unwrap_or("-"),
            b.content_bytes
        );
    }
    Ok(())
}

/// Print a book's metadata and the start of its text, downloading it if needed.
pub async fn run_show(app: &App, id: BookId) -> Result<()> {
    let book = app.get_or_fetch(id, false).await?;
    print_metadata(&book.summary());
    println!();
    println!("--- Text (first {} chars) ---", PREVIEW_CHARS);
    println!("{}", sample(&book.content, PREVIEW_CHARS));
    Ok(())
}

fn print_metadata(book: &BookSummary) {
    println!("--- Book ---");
    println!("id:             {}", book.id);
    println!("title:          {}", book.title.as_deref().unwrap_or("(untitled)"));
    println!("author:         {}", book.author.as_deref().unwrap_or("(unknown)"));
    println!("language:       {}", book.language.as_deref().unwrap_or("(undetected)"));
    if let Some(downloads) = book.download_count {
        println!("downloads:      {}", downloads);
    }
    println!("content_bytes:  {}", book.content_bytes);
    println!("retrieved_at:   {}", book.retrieved_at.format("%Y-%m-%dT%H:%M:%SZ"));
}

fn clip(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut out: String = text.chars().take(width.saturating_sub(3)).collect();
    out.push_str("...");
    out
}
