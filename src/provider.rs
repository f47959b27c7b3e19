//! LLM analysis providers.
//!
//! Implements [`AnalysisProvider`] for:
//! - **[`ChatCompletionsProvider`]**: any OpenAI-compatible chat completions
//!   endpoint (Groq by default, OpenAI, or a local gateway).
//! - **[`DisabledProvider`]**: fails every call; used when
//!   `provider.kind = "disabled"`.
//!
//! # Prompting
//!
//! Each kind sends the head of the book (15 000 chars for characters,
//! 5 000 for language, 20 000 for plot) with instructions to answer with a
//! bare JSON object. Replies are reduced to their JSON part (a fenced
//! ```` ```json ```` block first, otherwise the outermost `{...}`) and parsed
//! into the kind's payload. An empty or unparsable reply is a
//! [`ProviderError::MalformedResponse`]; no placeholder payload is invented.
//!
//! # Retry Strategy
//!
//! Off by default (`max_retries = 0`). When enabled, HTTP 429 and 5xx are
//! retried with exponential backoff (1s, 2s, 4s, ... capped at 2^5); other
//! 4xx fail immediately. The caller's timeout still bounds the whole call.

use anyhow::{bail, Result};
use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use gutenberg_analyst_core::normalize::sample;
use gutenberg_analyst_core::provider::AnalysisProvider;
use gutenberg_analyst_core::{AnalysisKind, AnalysisPayload, Book, ProviderError};

use crate::config::ProviderConfig;

static FENCED_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:json)?\s*(\{[\s\S]*?\})\s*```").expect("valid regex"));
static BARE_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\{[\s\S]*\})").expect("valid regex"));

/// Build the provider named by `config.kind`.
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn AnalysisProvider>> {
    match config.kind.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "groq" | "openai" => Ok(Arc::new(ChatCompletionsProvider::new(config)?)),
        other => bail!("Unknown analysis provider: {}", other),
    }
}

// ============ Disabled Provider ============

pub struct DisabledProvider;

#[async_trait]
impl AnalysisProvider for DisabledProvider {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn analyze(
        &self,
        _kind: AnalysisKind,
        _book: &Book,
    ) -> Result<AnalysisPayload, ProviderError> {
        Err(ProviderError::Disabled)
    }
}

// ============ Chat Completions Provider ============

/// Per-kind prompt parameters.
struct PromptParams {
    sample_chars: usize,
    temperature: f32,
    max_tokens: u32,
    system: &'static str,
}

fn prompt_params(kind: AnalysisKind) -> PromptParams {
    match kind {
        AnalysisKind::Characters => PromptParams {
            sample_chars: 15_000,
            temperature: 0.1,
            max_tokens: 1500,
            system: "You are an assistant specialized in literary analysis. Always respond with valid JSON only, no introductory text.",
        },
        AnalysisKind::Language => PromptParams {
            sample_chars: 5_000,
            temperature: 0.1,
            max_tokens: 150,
            system: "You are an assistant specialized in linguistic analysis. Always respond with valid JSON only, no introductory text.",
        },
        AnalysisKind::Plot => PromptParams {
            sample_chars: 20_000,
            temperature: 0.3,
            max_tokens: 1000,
            system: "You are an assistant specialized in literary work summaries. Always respond with valid JSON only, no introductory text.",
        },
    }
}

/// Build the user prompt for `kind`.
pub fn build_prompt(kind: AnalysisKind, book: &Book) -> String {
    let params = prompt_params(kind);
    let text = sample(&book.content, params.sample_chars);
    let title = book.title.as_deref().unwrap_or("Unknown title");
    let author = book.author.as_deref().unwrap_or("Unknown author");

    match kind {
        AnalysisKind::Characters => format!(
            r#"Book: "{title}" by {author}

Analyze the following text and identify the main characters of the book.
For each character, provide:
1. Character name
2. Brief description
3. Importance in the story (protagonist, main, secondary, etc.)

Identify between 3 and 7 characters depending on the complexity of the text.
Format the response in JSON with the structure:
{{
    "characters": [
        {{
            "name": "Character Name",
            "description": "Brief description",
            "importance": "protagonist|main|secondary"
        }}
    ]
}}

IMPORTANT: Return ONLY the JSON data without any introduction or explanation.

Sample text:
{text}"#
        ),
        AnalysisKind::Language => format!(
            r#"Analyze the following text and identify which language it is written in.
Provide the language name and the confidence level.
Format the response in JSON with the structure:
{{
    "language": "Language name",
    "confidence": value_between_0_and_1
}}

IMPORTANT: Return ONLY the JSON data without any introduction or explanation.

Sample text:
{text}"#
        ),
        AnalysisKind::Plot => format!(
            r#"Book: "{title}" by {author}

Read the following text and create a plot summary in up to 500 words.
Additionally, list 3 to 5 key events from the story.

Format the response in JSON with the structure:
{{
    "summary": "Plot summary",
    "key_events": ["Event 1", "Event 2", "Event 3"]
}}

IMPORTANT: Return ONLY the JSON data without any introduction or explanation.

Sample text:
{text}"#
        ),
    }
}

/// Reduce an LLM reply to its JSON object.
pub fn extract_json(content: &str) -> Option<&str> {
    if let Some(caps) = FENCED_JSON.captures(content) {
        return caps.get(1).map(|m| m.as_str());
    }
    BARE_JSON
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Parse a raw LLM reply into the payload of `kind`.
pub fn parse_reply(kind: AnalysisKind, content: &str) -> Result<AnalysisPayload, ProviderError> {
    if content.trim().is_empty() {
        return Err(ProviderError::MalformedResponse("empty reply".to_string()));
    }
    let json = extract_json(content).ok_or_else(|| {
        ProviderError::MalformedResponse(format!("no JSON object in reply: {}", preview(content)))
    })?;
    AnalysisPayload::from_json(kind, json)
        .map_err(|e| ProviderError::MalformedResponse(format!("invalid {} JSON: {}", kind, e)))
}

fn preview(text: &str) -> &str {
    sample(text, 200)
}

/// Provider for OpenAI-compatible `POST {base_url}/chat/completions`.
pub struct ChatCompletionsProvider {
    http: reqwest::Client,
    name: String,
    model: String,
    endpoint: String,
    api_key: String,
    max_retries: u32,
}

impl ChatCompletionsProvider {
    /// # Errors
    ///
    /// Returns an error if the API key environment variable is not set.
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let key_var = config.resolved_api_key_env();
        let api_key = std::env::var(&key_var)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", key_var))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &ProviderConfig, api_key: String) -> Result<Self> {
        // The coordinator applies the authoritative timeout; this one only
        // keeps abandoned sockets from lingering.
        let http = reqwest::Client::builder()
            .timeout(config.timeout() + Duration::from_secs(5))
            .build()?;
        Ok(Self {
            http,
            name: format!("{}:{}", config.kind, config.model),
            model: config.model.clone(),
            endpoint: format!("{}/chat/completions", config.resolved_base_url()),
            api_key,
            max_retries: config.max_retries,
        })
    }

    async fn complete(&self, kind: AnalysisKind, book: &Book) -> Result<String, ProviderError> {
        let params = prompt_params(kind);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": params.system },
                { "role": "user", "content": build_prompt(kind, book) },
            ],
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .http
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
                        return parse_completion(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = if status.as_u16() == 429 {
                        ProviderError::RateLimited(body_text)
                    } else {
                        ProviderError::Http(format!("{}: {}", status, body_text))
                    };

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    last_err = Some(ProviderError::Http(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| ProviderError::Http("request failed after retries".to_string())))
    }
}

/// Extract `choices[0].message.content` from a chat completions response.
fn parse_completion(json: &serde_json::Value) -> Result<String, ProviderError> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            ProviderError::MalformedResponse("missing choices[0].message.content".to_string())
        })
}

#[async_trait]
impl AnalysisProvider for ChatCompletionsProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(
        &self,
        kind: AnalysisKind,
        book: &Book,
    ) -> Result<AnalysisPayload, ProviderError> {
        tracing::info!(book_id = book.id, %kind, provider = %self.name, "requesting analysis");
        let content = self.complete(kind, book).await?;
        tracing::debug!(
            book_id = book.id,
            %kind,
            reply_len = content.len(),
            "received analysis reply"
        );
        parse_reply(kind, &content)
    }
}
