//! Analysis commands: `gba analyze`, `gba analyses`, `gba invalidate`.

use anyhow::Result;

use gutenberg_analyst_core::{AnalysisKind, AnalysisRecord, BookId};

use crate::app::App;

/// Print the cached or freshly computed analysis as pretty JSON.
pub async fn run_analyze(app: &App, id: BookId, kind: AnalysisKind) -> Result<()> {
    let record = app.analyze(id, kind).await?;
    print_header(&record);
    println!("{}", serde_json::to_string_pretty(&record.payload)?);
    Ok(())
}

pub async fn run_analyses(app: &App, id: BookId) -> Result<()> {
    let records = app.list_analyses(id).await?;
    if records.is_empty() {
        println!("No cached analyses for book {}.", id);
        return Ok(());
    }

    println!("{:<12} {:<14} CREATED", "KIND", "FINGERPRINT");
    for r in &records {
        println!(
            "{:<12} {:<14} {}",
            r.kind,
            r.fingerprint.short(),
            r.created_at.format("%Y-%m-%dT%H:%M:%SZ")
        );
    }
    Ok(())
}

pub async fn run_invalidate(app: &App, id: BookId, kind: AnalysisKind) -> Result<()> {
    if app.invalidate(id, kind).await? {
        println!("Invalidated {} analysis for book {}.", kind, id);
    } else {
        println!("No cached {} analysis for book {}.", kind, id);
    }
    Ok(())
}

fn print_header(record: &AnalysisRecord) {
    println!("--- {} analysis of book {} ---", record.kind, record.book_id);
    println!("fingerprint:  {}", record.fingerprint.short());
    println!("created_at:   {}", record.created_at.format("%Y-%m-%dT%H:%M:%SZ"));
    println!();
}
