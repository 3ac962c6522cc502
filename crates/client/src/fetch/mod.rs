//! HTTP fetch pipeline with retry, proxy support, and size limits.
//!
//! ### URL Canonicalization
//! - Trim whitespace, ensure scheme (default: `https`)
//! - Lowercase scheme and host, drop default ports and fragments
//! - Strip tracking query parameters
//!
//! ### Safety Gates
//! - Max redirects: 5
//! - Max body bytes: 5MB (configurable)
//! - Domain allow/deny policy, checked by callers before fetching
//!
//! ### Retry
//! - Timeouts, refused connections, 429 and 5xx are retried per [`RetryPolicy`]
//! - Everything else fails on the first attempt

pub mod domain;
pub mod retry;
pub mod url;

use bytes::{Bytes, BytesMut};
use reqwest::Url;
use reqwest::{Client, header};
use std::time::{Duration, Instant};

pub use domain::DomainPolicy;
pub use reqwest::StatusCode;
pub use retry::RetryPolicy;
pub use self::url::{UrlError, canonicalize, dedup_normalized, extract_urls, is_valid, normalize};

use linkscope_core::Error;
use linkscope_core::config::AppConfig;

/// Configuration for the fetch client.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "linkscope/0.1")
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 5MB)
    pub max_bytes: usize,

    /// Per-attempt request timeout (default: 30s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,

    /// Proxy applied to every request.
    pub proxy: Option<String>,

    pub retry: RetryPolicy,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "linkscope/0.1".to_string(),
            max_bytes: 5 * 1024 * 1024,
            timeout: Duration::from_millis(30_000),
            max_redirects: 5,
            proxy: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            max_bytes: config.max_bytes,
            timeout: config.timeout(),
            max_redirects: 5,
            proxy: config.proxy.clone(),
            retry: RetryPolicy::from(config),
        }
    }
}

/// Response from a fetch operation.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// The original URL requested
    pub url: Url,
    /// The final URL after redirects
    pub final_url: Url,
    /// HTTP status code
    pub status: StatusCode,
    /// Content-Type header
    pub content_type: Option<String>,
    /// Response body bytes
    pub bytes: Bytes,
    /// Time taken to fetch in milliseconds, across all attempts
    pub fetch_ms: u64,
}

impl FetchResponse {
    /// Response body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Anything that can retrieve a page.
///
/// The pipeline only talks to this trait so tests can substitute canned pages.
#[async_trait::async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchResponse, Error>;
}

/// HTTP fetch client backed by reqwest.
pub struct FetchClient {
    http: Client,
    config: FetchConfig,
}

fn classify(err: &reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::FetchTimeout(err.to_string())
    } else if err.is_connect() {
        Error::FetchConnection(err.to_string())
    } else {
        Error::HttpError(format!("network error: {err}"))
    }
}

impl FetchClient {
    /// Create a new fetch client with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let mut builder = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true);

        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| Error::InvalidInput(format!("invalid proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }

        let http = builder
            .build()
            .map_err(|e| Error::HttpError(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, config })
    }

    /// One attempt: GET the page, enforcing status and byte limits.
    async fn fetch_once(&self, url: &Url) -> Result<FetchResponse, Error> {
        let mut response = self
            .http
            .get(url.as_str())
            .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .send()
            .await
            .map_err(|e| classify(&e))?;

        let status = response.status();

        if !status.is_success() {
            return Err(Error::HttpStatus(status.as_u16()));
        }

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_bytes
        {
            let max = self.config.max_bytes;
            return Err(Error::FetchTooLarge(format!("{len} bytes exceeds {max}")));
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        // Content-Length can be absent or wrong, so the limit is enforced while reading.
        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| classify(&e))? {
            if body.len() + chunk.len() > self.config.max_bytes {
                let max = self.config.max_bytes;
                return Err(Error::FetchTooLarge(format!("body exceeds {max} bytes")));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(FetchResponse {
            url: url.clone(),
            final_url,
            status,
            content_type,
            bytes: body.freeze(),
            fetch_ms: 0,
        })
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl PageFetcher for FetchClient {
    /// Fetch a URL, retrying transient failures per the configured policy.
    async fn fetch(&self, url: &Url) -> Result<FetchResponse, Error> {
        let start = Instant::now();
        let mut response = self.config.retry.run(url.as_str(), || self.fetch_once(url)).await?;
        response.fetch_ms = start.elapsed().as_millis() as u64;

        tracing::debug!(
            "fetched {} -> {} in {}ms ({} bytes)",
            response.url,
            response.final_url,
            response.fetch_ms,
            response.bytes.len()
        );

        Ok(response)
    }
}
