//! TOML configuration.
//!
//! Every command reads one file passed via `--config`. `[db]` and
//! `[server]` are required; `[content]`, `[gutenberg]`, and `[provider]`
//! fall back to defaults.
//!
//! ```toml
//! [db]
//! path = "./data/gba.sqlite"
//!
//! [content]
//! max_bytes = 7500000
//!
//! [provider]
//! kind = "groq"
//! model = "llama3-70b-8192"
//!
//! [server]
//! bind = "127.0.0.1:8000"
//! ```

use anyhow::{Context, Result};
use gutenberg_analyst_core::normalize::{ContentBound, DEFAULT_MAX_BYTES};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub gutenberg: GutenbergConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContentConfig {
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
        }
    }
}

impl ContentConfig {
    pub fn bound(&self) -> ContentBound {
        ContentBound::new(self.max_bytes)
    }
}

fn default_max_bytes() -> usize {
    DEFAULT_MAX_BYTES
}

#[derive(Debug, Deserialize, Clone)]
pub struct GutenbergConfig {
    #[serde(default = "default_gutenberg_url")]
    pub base_url: String,
    #[serde(default = "default_gutenberg_timeout")]
    pub timeout_secs: u64,
}

impl Default for GutenbergConfig {
    fn default() -> Self {
        Self {
            base_url: default_gutenberg_url(),
            timeout_secs: default_gutenberg_timeout(),
        }
    }
}

fn default_gutenberg_url() -> String {
    "https://www.gutenberg.org".to_string()
}
fn default_gutenberg_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    /// `groq`, `openai`, or `disabled`.
    #[serde(default = "default_provider_kind")]
    pub kind: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Chat completions base URL. Defaults per `kind`.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding the API key. Defaults per `kind`.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub max_retries: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            model: default_model(),
            base_url: None,
            api_key_env: None,
            timeout_secs: default_provider_timeout(),
            max_retries: 0,
        }
    }
}

fn default_provider_kind() -> String {
    "groq".to_string()
}
fn default_model() -> String {
    "llama3-70b-8192".to_string()
}
fn default_provider_timeout() -> u64 {
    60
}

impl ProviderConfig {
    pub fn is_enabled(&self) -> bool {
        self.kind != "disabled"
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn resolved_base_url(&self) -> String {
        if let Some(url) = &self.base_url {
            return url.trim_end_matches('/').to_string();
        }
        match self.kind.as_str() {
            "openai" => "https://api.openai.com/v1".to_string(),
            _ => "https://api.groq.com/openai/v1".to_string(),
        }
    }

    pub fn resolved_api_key_env(&self) -> String {
        if let Some(var) = &self.api_key_env {
            return var.clone();
        }
        match self.kind.as_str() {
            "openai" => "OPENAI_API_KEY".to_string(),
            _ => "GROQ_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.content.max_bytes == 0 {
        anyhow::bail!("content.max_bytes must be > 0");
    }

    if config.gutenberg.timeout_secs == 0 {
        anyhow::bail!("gutenberg.timeout_secs must be > 0");
    }

    if config.provider.timeout_secs == 0 {
        anyhow::bail!("provider.timeout_secs must be > 0");
    }

    match config.provider.kind.as_str() {
        "disabled" | "groq" | "openai" => {}
        other => anyhow::bail!(
            "Unknown analysis provider: '{}'. Must be groq, openai, or disabled.",
            other
        ),
    }

    if config.provider.is_enabled() && config.provider.model.trim().is_empty() {
        anyhow::bail!(
            "provider.model must be specified when provider is '{}'",
            config.provider.kind
        );
    }

    Ok(config)
}
