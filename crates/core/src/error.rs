//! Unified error types for linkscope.
//!
//! Every failure carries a stable `CODE:` prefix in its display form, maps
//! onto the [`ErrorKind`] taxonomy, and can be rendered as a short message
//! for chat users without leaking internals.

use rmcp::model::{ErrorCode, ErrorData as McpError};
use tokio_rusqlite::rusqlite;

use crate::config::ConfigError;

/// Unified error types for the linkscope pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., empty URL list).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Invalid or unsupported URL.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// Domain rejected by the allow/deny policy.
    #[error("DOMAIN_BLOCKED: {0}")]
    DomainBlocked(String),

    /// Fetch attempt exceeded its wall-clock timeout.
    #[error("FETCH_TIMEOUT: {0}")]
    FetchTimeout(String),

    /// Could not connect to the remote host.
    #[error("FETCH_CONNECTION: {0}")]
    FetchConnection(String),

    /// Fetch response too large.
    #[error("FETCH_TOO_LARGE: {0}")]
    FetchTooLarge(String),

    /// Non-success HTTP status.
    #[error("HTTP_STATUS: {0}")]
    HttpStatus(u16),

    /// Any other transport-level failure.
    #[error("HTTP_ERROR: {0}")]
    HttpError(String),

    /// The page yielded no readable text.
    #[error("CONTENT_EMPTY: {0}")]
    ContentEmpty(String),

    /// Content extraction failed (malformed or non-text markup).
    #[error("EXTRACT_FAILED: {0}")]
    ExtractFailed(String),

    /// Screenshot capture failed.
    #[error("CAPTURE_FAILED: {0}")]
    CaptureFailed(String),

    /// Screenshot crop failed.
    #[error("CROP_FAILED: {0}")]
    CropFailed(String),

    /// Screenshot capture is not compiled in or disabled.
    #[error("RENDER_DISABLED")]
    RenderDisabled,

    /// Writing a cache entry or companion file failed.
    #[error("CACHE_WRITE: {0}")]
    CacheWrite(String),

    /// Reading a cache entry or companion file failed.
    #[error("CACHE_READ: {0}")]
    CacheRead(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// Configuration could not be loaded or is invalid.
    #[error("CONFIG_INVALID: {0}")]
    Config(#[from] ConfigError),
}

/// Network failure flavours.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, schemars::JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum NetworkKind {
    Timeout,
    Connection,
    Generic,
}

/// Parsing failure flavours.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, schemars::JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ParsingKind {
    EmptyContent,
    MalformedMarkup,
}

/// Screenshot failure flavours.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, schemars::JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ScreenshotKind {
    CaptureFailure,
    CropFailure,
}

/// Cache failure flavours.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, schemars::JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum CacheKind {
    WriteFailure,
    ReadFailure,
}

/// Error taxonomy used for retry decisions and user-facing rendering.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, schemars::JsonSchema,
)]
#[serde(tag = "category", content = "detail", rename_all = "snake_case")]
pub enum ErrorKind {
    Network(NetworkKind),
    Parsing(ParsingKind),
    Screenshot(ScreenshotKind),
    Cache(CacheKind),
    ConfigInvalid,
    Input,
    Policy,
}

impl ErrorKind {
    /// Short summary of what failed plus a remediation hint.
    pub fn describe(self) -> (&'static str, &'static str) {
        match self {
            ErrorKind::Network(NetworkKind::Timeout) => (
                "Request timed out",
                "The site is responding slowly; retry later or raise the request timeout.",
            ),
            ErrorKind::Network(NetworkKind::Connection) => (
                "Could not connect",
                "Check that the site is reachable and the proxy settings are correct.",
            ),
            ErrorKind::Network(NetworkKind::Generic) => {
                ("Request failed", "Check the URL and network connection, then try again.")
            }
            ErrorKind::Parsing(ParsingKind::EmptyContent) => (
                "No readable content",
                "The page may be empty, script-rendered, or in an unsupported format.",
            ),
            ErrorKind::Parsing(ParsingKind::MalformedMarkup) => (
                "Could not parse the page",
                "The page markup is unusual; a screenshot-only request may still work.",
            ),
            ErrorKind::Screenshot(ScreenshotKind::CaptureFailure) => (
                "Screenshot failed",
                "Check the browser installation or adjust the screenshot settings.",
            ),
            ErrorKind::Screenshot(ScreenshotKind::CropFailure) => {
                ("Screenshot crop failed", "Check that the crop area fits inside the viewport.")
            }
            ErrorKind::Cache(CacheKind::WriteFailure) => {
                ("Cache write failed", "Check permissions and free space in the cache directory.")
            }
            ErrorKind::Cache(CacheKind::ReadFailure) => {
                ("Cache read failed", "The cache may be corrupted; clearing it is safe.")
            }
            ErrorKind::ConfigInvalid => {
                ("Invalid configuration", "Review the configured values and restart.")
            }
            ErrorKind::Input => {
                ("Invalid request", "Check the link format, e.g. https://example.com.")
            }
            ErrorKind::Policy => (
                "Domain not allowed",
                "This domain is blocked by the configured domain policy.",
            ),
        }
    }
}

impl Error {
    /// Classify this error into the [`ErrorKind`] taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidInput(_) | Error::InvalidUrl(_) => ErrorKind::Input,
            Error::DomainBlocked(_) => ErrorKind::Policy,
            Error::FetchTimeout(_) => ErrorKind::Network(NetworkKind::Timeout),
            Error::FetchConnection(_) => ErrorKind::Network(NetworkKind::Connection),
            Error::FetchTooLarge(_) | Error::HttpStatus(_) | Error::HttpError(_) => {
                ErrorKind::Network(NetworkKind::Generic)
            }
            Error::ContentEmpty(_) => ErrorKind::Parsing(ParsingKind::EmptyContent),
            Error::ExtractFailed(_) => ErrorKind::Parsing(ParsingKind::MalformedMarkup),
            Error::CaptureFailed(_) | Error::RenderDisabled => {
                ErrorKind::Screenshot(ScreenshotKind::CaptureFailure)
            }
            Error::CropFailed(_) => ErrorKind::Screenshot(ScreenshotKind::CropFailure),
            Error::CacheWrite(_) | Error::MigrationFailed(_) => {
                ErrorKind::Cache(CacheKind::WriteFailure)
            }
            Error::CacheRead(_) | Error::Database(_) => ErrorKind::Cache(CacheKind::ReadFailure),
            Error::Config(_) => ErrorKind::ConfigInvalid,
        }
    }

    /// Whether a fetch that failed with this error is worth retrying.
    ///
    /// Only transport hiccups qualify: timeouts, refused connections, and
    /// 429 / 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::FetchTimeout(_) | Error::FetchConnection(_) => true,
            Error::HttpStatus(status) => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }

    /// Render a short, human-readable failure message.
    ///
    /// The detail line is capped at 100 characters.
    pub fn user_message(&self, url: Option<&str>) -> String {
        let (summary, hint) = self.kind().describe();
        let mut detail = self.to_string();
        if detail.chars().count() > 100 {
            detail = detail.chars().take(100).collect::<String>() + "...";
        }

        let mut lines = vec![format!("❌ {summary}")];
        if let Some(url) = url {
            lines.push(format!("🔗 {url}"));
        }
        lines.push(format!("📋 {detail}"));
        lines.push(format!("💡 {hint}"));
        lines.join("\n")
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => {
                Error::Database(tokio_rusqlite::Error::ConnectionClosed)
            }
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let code = match &err {
            Error::InvalidInput(_) | Error::InvalidUrl(_) => -32602,
            Error::DomainBlocked(_) => -32004,
            Error::FetchTimeout(_) => -32006,
            Error::FetchTooLarge(_) => -32007,
            Error::FetchConnection(_) | Error::HttpStatus(_) | Error::HttpError(_) => -32008,
            Error::ContentEmpty(_) | Error::ExtractFailed(_) => -32000,
            Error::RenderDisabled => -32011,
            Error::CaptureFailed(_) | Error::CropFailed(_) => -32012,
            Error::CacheWrite(_)
            | Error::CacheRead(_)
            | Error::Database(_)
            | Error::MigrationFailed(_) => -32002,
            Error::Config(_) => -32013,
        };

        McpError { code: ErrorCode(code), message: err.to_string().into(), data: None }
    }
}
