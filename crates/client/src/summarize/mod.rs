//! Page summarization.
//!
//! A [`Summarizer`] turns extracted page content into a short summary. The
//! LLM-backed implementation talks to any OpenAI-compatible
//! `/chat/completions` endpoint and never fails loudly: every problem is
//! logged and reported as "no summary", which the pipeline answers with
//! [`fallback_excerpt`].

mod wire;

use linkscope_core::config::LlmConfig;
use reqwest::header;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::extract::ExtractedContent;
use wire::{ChatMessage, ChatRequest, ChatResponse};

/// Characters of page text used for the fallback excerpt.
pub const EXCERPT_CHARS: usize = 500;

/// Characters of page text sent to the model.
const PROMPT_CONTENT_CHARS: usize = 8_000;

const SYSTEM_PROMPT: &str = "You summarize web pages. Reply with a concise summary of the main \
    points in plain text, at most a few short paragraphs.";

/// Anything that can summarize extracted content.
#[async_trait::async_trait]
pub trait Summarizer: Send + Sync {
    /// Summary text, or `None` when no summary could be produced.
    async fn summarize(&self, content: &ExtractedContent) -> Option<String>;
}

/// Title plus the first [`EXCERPT_CHARS`] characters of the page text.
pub fn fallback_excerpt(content: &ExtractedContent) -> String {
    let mut excerpt: String = content.text.chars().take(EXCERPT_CHARS).collect();
    if content.text.chars().count() > EXCERPT_CHARS {
        excerpt.push_str("...");
    }
    match &content.title {
        Some(title) => format!("{title}\n\n{excerpt}"),
        None => excerpt,
    }
}

/// Errors from the completion endpoint. Logged, never surfaced.
#[derive(Debug, thiserror::Error)]
enum SummarizeError {
    #[error("authentication failed")]
    Auth,

    #[error("rate limited")]
    RateLimited,

    #[error("HTTP error: {status}")]
    HttpError { status: u16 },

    #[error("request timeout")]
    Timeout,

    #[error("network error: {0}")]
    Network(Arc<reqwest::Error>),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("empty completion")]
    Empty,
}

impl From<reqwest::Error> for SummarizeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SummarizeError::Timeout
        } else {
            SummarizeError::Network(Arc::new(err))
        }
    }
}

/// LLM client settings.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    /// Base URL; `/chat/completions` is appended.
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
}

impl LlmSettings {
    /// Settings from config, or `None` when no endpoint is configured.
    pub fn from_config(config: &LlmConfig) -> Option<Self> {
        let endpoint = config.endpoint.as_deref().map(str::trim).filter(|e| !e.is_empty())?;
        Some(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            model: config.model.clone(),
            timeout: config.timeout(),
        })
    }
}

/// Summarizer backed by an OpenAI-compatible chat completion API.
#[derive(Debug, Clone)]
pub struct LlmSummarizer {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl LlmSummarizer {
    pub fn new(settings: LlmSettings) -> Result<Self, linkscope_core::Error> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .use_rustls_tls()
            .build()
            .map_err(|e| {
                linkscope_core::Error::HttpError(format!("failed to build LLM client: {e}"))
            })?;
        Ok(Self { http, settings })
    }

    /// Build a summarizer when the config enables one.
    pub fn from_config(config: &LlmConfig) -> Result<Option<Self>, linkscope_core::Error> {
        LlmSettings::from_config(config).map(Self::new).transpose()
    }

    fn prompt(content: &ExtractedContent) -> String {
        let body: String = content.text.chars().take(PROMPT_CONTENT_CHARS).collect();
        let title = content.title.as_deref().unwrap_or("(untitled)");
        format!("Title: {title}\nURL: {}\n\n{body}", content.url)
    }

    async fn complete(&self, content: &ExtractedContent) -> Result<String, SummarizeError> {
        let url = format!("{}/chat/completions", self.settings.endpoint);
        let body = ChatRequest {
            model: &self.settings.model,
            messages: vec![
                ChatMessage { role: "system", content: SYSTEM_PROMPT.to_string() },
                ChatMessage { role: "user", content: Self::prompt(content) },
            ],
            max_tokens: None,
        };

        let mut request =
            self.http.post(&url).header(header::ACCEPT, "application/json").json(&body);
        if let Some(key) = &self.settings.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == 401 || status == 403 {
            return Err(SummarizeError::Auth);
        }
        if status == 429 {
            return Err(SummarizeError::RateLimited);
        }
        if status.is_client_error() || status.is_server_error() {
            return Err(SummarizeError::HttpError { status: status.as_u16() });
        }

        let bytes = response.bytes().await?;
        let parsed: ChatResponse =
            serde_json::from_slice(&bytes).map_err(|e| SummarizeError::Parse(e.to_string()))?;
        parsed.first_text().ok_or(SummarizeError::Empty)
    }
}

#[async_trait::async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, content: &ExtractedContent) -> Option<String> {
        let start = Instant::now();
        match self.complete(content).await {
            Ok(summary) => {
                tracing::debug!(url = %content.url, "summarized in {:?}", start.elapsed());
                Some(summary)
            }
            Err(e) => {
                tracing::warn!(url = %content.url, "summary unavailable: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(title: Option<&str>, text: &str) -> ExtractedContent {
        ExtractedContent {
            url: "https://example.com/".into(),
            title: title.map(String::from),
            description: None,
            text: text.into(),
            truncated: false,
            word_count: text.split_whitespace().count(),
            links: Vec::new(),
        }
    }

    #[test]
    fn test_fallback_excerpt_short() {
        let excerpt = fallback_excerpt(&content(Some("Title"), "Body text"));
        assert_eq!(excerpt, "Title\n\nBody text");
    }

    #[test]
    fn test_fallback_excerpt_truncates() {
        let text = "あ".repeat(EXCERPT_CHARS + 10);
        let excerpt = fallback_excerpt(&content(None, &text));
        assert_eq!(excerpt.chars().count(), EXCERPT_CHARS + 3);
        assert!(excerpt.ends_with("..."));
    }

    #[test]
    fn test_settings_require_endpoint() {
        assert!(LlmSettings::from_config(&LlmConfig::default()).is_none());

        let config = LlmConfig {
            endpoint: Some("https://llm.test/v1/".into()),
            api_key: Some(String::new()),
            ..Default::default()
        };
        let settings = LlmSettings::from_config(&config).unwrap();
        assert_eq!(settings.endpoint, "https://llm.test/v1");
        assert!(settings.api_key.is_none());
        assert_eq!(settings.model, "gpt-4o-mini");
    }

    #[tokio::test]
    async fn test_from_config_disabled() {
        assert!(LlmSummarizer::from_config(&LlmConfig::default()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_yields_none() {
        let summarizer = LlmSummarizer::new(LlmSettings {
            endpoint: "http://127.0.0.1:9".into(),
            api_key: None,
            model: "test".into(),
            timeout: Duration::from_secs(2),
        })
        .unwrap();
        assert_eq!(summarizer.summarize(&content(Some("T"), "text")).await, None);
    }
}
