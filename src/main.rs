//! # Gutenberg Analyst CLI (`gba`)
//!
//! ## Usage
//!
//! ```bash
//! gba --config ./config/gba.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `gba init` | Create the SQLite database and run schema migrations |
//! | `gba fetch <id>` | Download and store a book |
//! | `gba books` | List stored books |
//! | `gba show <id>` | Print a book's metadata and opening text |
//! | `gba analyze <id> <kind>` | Get or compute an analysis |
//! | `gba analyses <id>` | List cached analyses of a book |
//! | `gba invalidate <id> <kind>` | Drop a cached analysis |
//! | `gba doctor` | Check database and provider configuration |
//! | `gba serve` | Start the HTTP API server |
//!
//! Logs go to stderr and are filtered with `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use gutenberg_analyst::app::App;
use gutenberg_analyst::{analysis, books, config, doctor, migrate, server};
use gutenberg_analyst_core::{AnalysisKind, BookId};

/// Gutenberg Analyst: fetch public-domain books and cache LLM analyses of them.
#[derive(Parser)]
#[command(
    name = "gba",
    about = "Gutenberg Analyst: fetch Project Gutenberg books and cache LLM-derived analyses",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/gba.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Download a book and store it.
    ///
    /// An already stored book is not downloaded again unless `--refresh`
    /// is given. Refreshing makes cached analyses stale.
    Fetch {
        /// Project Gutenberg ebook number.
        id: BookId,

        /// Download again and replace the stored text.
        #[arg(long)]
        refresh: bool,
    },

    /// List stored books, most recently retrieved first.
    Books,

    /// Show a book's metadata and the beginning of its text.
    Show {
        id: BookId,
    },

    /// Get an analysis of a stored book, computing it on a cache miss.
    Analyze {
        id: BookId,

        /// `characters`, `language`, or `plot`.
        kind: AnalysisKind,
    },

    /// List cached analyses of a book.
    Analyses {
        id: BookId,
    },

    /// Remove a cached analysis so the next request recomputes it.
    Invalidate {
        id: BookId,
        kind: AnalysisKind,
    },

    /// Check database reachability and provider configuration.
    Doctor,

    /// Start the HTTP API server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Doctor => {
            doctor::run_doctor(&cfg).await?;
        }
        Commands::Serve => {
            let app = Arc::new(App::open(&cfg).await?);
            server::run_server(app).await?;
        }
        command => {
            let app = App::open(&cfg).await?;
            let result = match command {
                Commands::Fetch { id, refresh } => books::run_fetch(&app, id, refresh).await,
                Commands::Books => books::run_books(&app).await,
                Commands::Show { id } => books::run_show(&app, id).await,
                Commands::Analyze { id, kind } => analysis::run_analyze(&app, id, kind).await,
                Commands::Analyses { id } => analysis::run_analyses(&app, id).await,
                Commands::Invalidate { id, kind } => analysis::run_invalidate(&app, id, kind).await,
                Commands::Init | Commands::Doctor | Commands::Serve => Ok(()),
            };
            app.close().await;
            result?;
        }
    }

    Ok(())
}
