//! Cache key generation.

use sha2::{Digest, Sha256};

use crate::config::ContentMode;

/// Prefix of content-derived cache keys.
pub const CONTENT_KEY_PREFIX: &str = "sha256:";

/// Suffix distinguishing screenshot-only results from full analyses.
pub const SCREENSHOT_ONLY_SUFFIX: &str = "_screenshot_only";

/// SHA-256 hex of a URL, used for file names and persisted primary keys.
pub fn url_hash(url: &str) -> String {
    hex::encode(Sha256::digest(url.as_bytes()))
}

/// Content-derived cache key: `sha256:<hex>`.
pub fn content_key(content: &str) -> String {
    format!("{CONTENT_KEY_PREFIX}{}", hex::encode(Sha256::digest(content.as_bytes())))
}

/// Result cache key for a normalized URL under a content mode.
///
/// `Both` and `AnalysisOnly` share a key; screenshot-only results never
/// shadow full analyses.
pub fn result_key(normalized_url: &str, mode: ContentMode) -> String {
    match mode {
        ContentMode::ScreenshotOnly => format!("{normalized_url}{SCREENSHOT_ONLY_SUFFIX}"),
        ContentMode::Both | ContentMode::AnalysisOnly => normalized_url.to_string(),
    }
}
