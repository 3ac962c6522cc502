//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::{AppConfig, MAX_CONCURRENCY_LIMIT};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },

    #[error("unsupported configuration schema version {0}")]
    UnsupportedVersion(u32),
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `max_bytes` is 0 or exceeds 50MB
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `user_agent` is empty
    /// - retry, cache, or screenshot settings fall outside their ranges
    ///
    /// Returns `ConfigError::Missing` if an LLM endpoint is set without a model.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_bytes == 0 {
            return Err(invalid("max_bytes", "must be greater than 0"));
        }
        if self.max_bytes > 50 * 1024 * 1024 {
            return Err(invalid("max_bytes", "must not exceed 50MB"));
        }

        if self.timeout_ms < 100 {
            return Err(invalid("timeout_ms", "must be at least 100ms"));
        }
        if self.timeout_ms > 300_000 {
            return Err(invalid("timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }

        if !(1..=10).contains(&self.retry_count) {
            return Err(invalid("retry_count", "must be between 1 and 10 attempts"));
        }
        if self.retry_delay_ms > 60_000 {
            return Err(invalid("retry_delay_ms", "must not exceed 60000ms"));
        }

        if let Some(proxy) = &self.proxy
            && url::Url::parse(proxy).is_err()
        {
            return Err(invalid("proxy", "must be a valid URL"));
        }

        if self.max_content_length < 100 {
            return Err(invalid("max_content_length", "must be at least 100 characters"));
        }

        if self.max_concurrency == 0 || self.max_concurrency > MAX_CONCURRENCY_LIMIT {
            tracing::warn!(
                configured = self.max_concurrency,
                effective = self.effective_max_concurrency(),
                "max_concurrency out of range; clamping"
            );
        }

        if self.cache_max_size == 0 {
            return Err(invalid("cache_max_size", "must be at least 1"));
        }
        if self.cache_ttl_minutes == 0 {
            return Err(invalid("cache_ttl_minutes", "must be at least 1 minute"));
        }

        if !matches!(self.default_protocol.as_str(), "http" | "https") {
            return Err(invalid("default_protocol", "must be http or https"));
        }

        self.validate_screenshot()?;

        if self.llm.endpoint.is_some() && self.llm.model.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: "llm.model".into(),
                hint: "set LINKSCOPE_LLM__MODEL when an endpoint is configured".into(),
            });
        }

        if !self.allowlist_domains.is_empty() && !self.denylist_domains.is_empty() {
            tracing::warn!(
                allowlist_count = self.allowlist_domains.len(),
                denylist_count = self.denylist_domains.len(),
                "Both allowlist_domains and denylist_domains are set; \
                 allowlist takes precedence"
            );
        }

        Ok(())
    }

    fn validate_screenshot(&self) -> Result<(), ConfigError> {
        let shot = &self.screenshot;

        if shot.ttl_secs == 0 {
            return Err(invalid("screenshot.ttl_secs", "must be at least 1 second"));
        }
        if shot.cleanup_interval_secs == 0 {
            return Err(invalid("screenshot.cleanup_interval_secs", "must be at least 1 second"));
        }
        if shot.memory_cache_size == 0 {
            return Err(invalid("screenshot.memory_cache_size", "must be at least 1"));
        }
        if !(100..=7680).contains(&shot.width) {
            return Err(invalid("screenshot.width", "must be between 100 and 7680"));
        }
        if !(100..=4320).contains(&shot.height) {
            return Err(invalid("screenshot.height", "must be between 100 and 4320"));
        }
        if !(1..=100).contains(&shot.quality) {
            return Err(invalid("screenshot.quality", "must be between 1 and 100"));
        }
        if shot.wait_ms > 60_000 {
            return Err(invalid("screenshot.wait_ms", "must not exceed 60000ms"));
        }
        if let Some(crop) = shot.crop
            && (crop.width == 0 || crop.height == 0)
        {
            return Err(invalid("screenshot.crop", "width and height must be greater than 0"));
        }

        Ok(())
    }
}
