//! # Gutenberg Analyst
//!
//! Fetches public-domain books from Project Gutenberg, stores them in SQLite,
//! and serves LLM-derived analyses (main characters, language, plot summary)
//! from a fingerprint-checked cache.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────┐
//! │  Gutenberg  │──▶│  Normalizer  │──▶│  SQLite  │
//! │  fetcher    │   │ (ContentBound)│  │  books   │
//! └─────────────┘   └──────────────┘   └────┬─────┘
//!                                           │
//!                   ┌──────────────┐   ┌────▼─────┐   ┌──────────┐
//!                   │ LLM provider │◀──│Coordinator│──▶│ analyses │
//!                   └──────────────┘   └────┬─────┘   └──────────┘
//!                        ┌──────────────────┤
//!                        ▼                  ▼
//!                   ┌──────────┐       ┌──────────┐
//!                   │   CLI    │       │   HTTP   │
//!                   │  (gba)   │       │  (axum)  │
//!                   └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! gba init                      # create database
//! gba fetch 84                  # download Frankenstein
//! gba analyze 84 plot           # summarize it (cached afterwards)
//! gba serve                     # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite book repository and analysis cache |
//! | [`gutenberg`] | Book download and metadata scraping |
//! | [`provider`] | LLM analysis providers |
//! | [`coordinator`] | Cache lookup and in-flight de-duplication |
//! | [`app`] | Collaborator wiring shared by CLI and server |
//! | [`server`] | HTTP API |
//!
//! Models, the content normalizer, fingerprints, and the storage traits live
//! in the `gutenberg-analyst-core` crate.

pub mod analysis;
pub mod app;
pub mod books;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod doctor;
pub mod gutenberg;
pub mod migrate;
pub mod provider;
pub mod server;
pub mod sqlite_store;
