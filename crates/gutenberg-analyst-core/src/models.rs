//! Core data models.
//!
//! These types represent the books, analysis kinds, and cached analysis
//! records that flow between the repository, the cache store, and the
//! analysis coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::fingerprint::Fingerprint;

/// Project Gutenberg ebook number. Positive, externally assigned.
pub type BookId = u32;

/// A stored book with its (normalized) text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Book {
    pub id: BookId,
    pub title: Option<String>,
    pub author: Option<String>,
    pub language: Option<String>,
    pub download_count: Option<i64>,
    pub content: String,
    pub retrieved_at: DateTime<Utc>,
}

impl Book {
    /// Metadata view without the text body.
    pub fn summary(&self) -> BookSummary {
        BookSummary {
            id: self.id,
            title: self.title.clone(),
            author: self.author.clone(),
            language: self.language.clone(),
            download_count: self.download_count,
            content_bytes: self.content.len(),
            retrieved_at: self.retrieved_at,
        }
    }
}

/// Book metadata for listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookSummary {
    pub id: BookId,
    pub title: Option<String>,
    pub author: Option<String>,
    pub language: Option<String>,
    pub download_count: Option<i64>,
    pub content_bytes: usize,
    pub retrieved_at: DateTime<Utc>,
}

/// The closed set of LLM-derived analyses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisKind {
    Characters,
    Language,
    Plot,
}

impl AnalysisKind {
    pub const ALL: [AnalysisKind; 3] = [
        AnalysisKind::Characters,
        AnalysisKind::Language,
        AnalysisKind::Plot,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisKind::Characters => "characters",
            AnalysisKind::Language => "language",
            AnalysisKind::Plot => "plot",
        }
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown analysis kind '{0}' (expected characters, language, or plot)")]
pub struct UnknownKind(pub String);

impl FromStr for AnalysisKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "characters" => Ok(AnalysisKind::Characters),
            "language" => Ok(AnalysisKind::Language),
            "plot" => Ok(AnalysisKind::Plot),
            _ => Err(UnknownKind(s.to_string())),
        }
    }
}

/// One character identified in a book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    pub description: String,
    /// `protagonist`, `main`, `secondary`, ...
    pub importance: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterAnalysis {
    pub characters: Vec<Character>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageAnalysis {
    pub language: String,
    /// In `[0, 1]`.
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotAnalysis {
    pub summary: String,
    pub key_events: Vec<String>,
}

/// Structured result of one analysis. Serializes as the bare per-kind object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AnalysisPayload {
    Characters(CharacterAnalysis),
    Language(LanguageAnalysis),
    Plot(PlotAnalysis),
}

impl AnalysisPayload {
    pub fn kind(&self) -> AnalysisKind {
        match self {
            AnalysisPayload::Characters(_) => AnalysisKind::Characters,
            AnalysisPayload::Language(_) => AnalysisKind::Language,
            AnalysisPayload::Plot(_) => AnalysisKind::Plot,
        }
    }

    /// Interpret a JSON object as the payload of `kind`.
    pub fn from_value(kind: AnalysisKind, value: serde_json::Value) -> serde_json::Result<Self> {
        Ok(match kind {
            AnalysisKind::Characters => AnalysisPayload::Characters(serde_json::from_value(value)?),
            AnalysisKind::Language => {
                let lang: LanguageAnalysis = serde_json::from_value(value)?;
                AnalysisPayload::Language(LanguageAnalysis {
                    confidence: lang.confidence.clamp(0.0, 1.0),
                    ..lang
                })
            }
            AnalysisKind::Plot => AnalysisPayload::Plot(serde_json::from_value(value)?),
        })
    }

    pub fn from_json(kind: AnalysisKind, json: &str) -> serde_json::Result<Self> {
        Self::from_value(kind, serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// A cached analysis: unique per `(book_id, kind)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisRecord {
    pub book_id: BookId,
    pub kind: AnalysisKind,
    pub payload: AnalysisPayload,
    /// Fingerprint of the normalized text the payload was produced from.
    pub fingerprint: Fingerprint,
    pub created_at: DateTime<Utc>,
}

impl AnalysisRecord {
    /// Whether this record was produced from text with `fingerprint`.
    pub fn is_fresh_for(&self, fingerprint: &Fingerprint) -> bool {
        &self.fingerprint == fingerprint
    }
}
