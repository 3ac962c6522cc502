//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (LINKSCOPE_*)
//! 2. TOML config file (if LINKSCOPE_CONFIG_FILE set)
//! 3. Built-in defaults
//!
//! The raw layers pass through [`migration::migrate`] before they are merged
//! over the defaults, so older config files keep loading.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

pub mod migration;
mod validation;

pub use validation::ConfigError;

/// Current configuration schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Upper bound for the pipeline concurrency limit.
pub const MAX_CONCURRENCY_LIMIT: usize = 20;

/// How the delay between fetch retries grows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryBackoff {
    /// Same delay before every retry.
    #[default]
    Fixed,
    /// Delay multiplied by the attempt number.
    Incremental,
}

/// Which parts of an analysis a request produces.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ContentMode {
    /// Text analysis plus screenshot.
    #[default]
    Both,
    /// Text analysis only.
    AnalysisOnly,
    /// Screenshot only; fetch, extract, and summarize are skipped.
    ScreenshotOnly,
}

impl ContentMode {
    pub fn wants_screenshot(self) -> bool {
        !matches!(self, ContentMode::AnalysisOnly)
    }
}

impl std::fmt::Display for ContentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ContentMode::Both => "both",
            ContentMode::AnalysisOnly => "analysis_only",
            ContentMode::ScreenshotOnly => "screenshot_only",
        })
    }
}

impl std::str::FromStr for ContentMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "both" => Ok(ContentMode::Both),
            "analysis_only" | "analysis" | "text" => Ok(ContentMode::AnalysisOnly),
            "screenshot_only" | "screenshot" => Ok(ContentMode::ScreenshotOnly),
            other => Err(ConfigError::Invalid {
                field: "content_mode".into(),
                reason: format!("unknown mode {other}"),
            }),
        }
    }
}

/// Encoded image format for screenshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureFormat {
    #[default]
    Jpeg,
    Png,
}

impl CaptureFormat {
    /// File extension used for temp files.
    pub fn extension(self) -> &'static str {
        match self {
            CaptureFormat::Jpeg => "jpg",
            CaptureFormat::Png => "png",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            CaptureFormat::Jpeg => "image/jpeg",
            CaptureFormat::Png => "image/png",
        }
    }
}

/// Crop rectangle applied to captured screenshots, serialized as `[x, y, width, height]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u32; 4]", into = "[u32; 4]")]
pub struct CropArea {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl From<[u32; 4]> for CropArea {
    fn from([x, y, width, height]: [u32; 4]) -> Self {
        Self { x, y, width, height }
    }
}

impl From<CropArea> for [u32; 4] {
    fn from(area: CropArea) -> Self {
        [area.x, area.y, area.width, area.height]
    }
}

/// Screenshot capture and temp-file settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Lifetime of temp screenshot files, in seconds.
    #[serde(default = "default_screenshot_ttl_secs")]
    pub ttl_secs: u64,

    /// Interval between reaper sweeps, in seconds.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Capacity of the in-memory screenshot LRU.
    #[serde(default = "default_memory_cache_size")]
    pub memory_cache_size: usize,

    /// Directory for temp screenshot files.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    /// JPEG quality (ignored for PNG).
    #[serde(default = "default_quality")]
    pub quality: u8,

    #[serde(default)]
    pub format: CaptureFormat,

    #[serde(default)]
    pub full_page: bool,

    /// Extra settle time after navigation before capturing, in milliseconds.
    #[serde(default = "default_wait_ms")]
    pub wait_ms: u64,

    #[serde(default)]
    pub crop: Option<CropArea>,
}

fn default_screenshot_ttl_secs() -> u64 {
    60
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

fn default_memory_cache_size() -> usize {
    30
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("./data/temp")
}

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

fn default_quality() -> u8 {
    80
}

fn default_wait_ms() -> u64 {
    2_000
}

impl Default for ScreenshotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_screenshot_ttl_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            memory_cache_size: default_memory_cache_size(),
            temp_dir: default_temp_dir(),
            width: default_width(),
            height: default_height(),
            quality: default_quality(),
            format: CaptureFormat::Jpeg,
            full_page: false,
            wait_ms: default_wait_ms(),
            crop: None,
        }
    }
}

impl ScreenshotConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

/// OpenAI-compatible summarizer endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL, e.g. `https://api.openai.com/v1`. Summaries are disabled when unset.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Set via LINKSCOPE_LLM__API_KEY environment variable.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_llm_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_llm_model() -> String {
    "gpt-4o-mini".into()
}

fn default_llm_timeout_ms() -> u64 {
    30_000
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            model: default_llm_model(),
            timeout_ms: default_llm_timeout_ms(),
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (LINKSCOPE_*)
/// 2. TOML config file (if LINKSCOPE_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Schema version of the loaded document; see [`migration`].
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// User-Agent string for HTTP requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Maximum bytes to fetch per request.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Per-attempt HTTP timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Total fetch attempts, including the first.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Base delay between fetch attempts in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default)]
    pub retry_backoff: RetryBackoff,

    /// Proxy URL applied to all outbound requests.
    #[serde(default)]
    pub proxy: Option<String>,

    /// Extracted text is truncated to this many characters.
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,

    /// Concurrent pipeline runs; clamped to `1..=20`.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_true")]
    pub enable_cache: bool,

    /// Maximum live entries in the in-memory result cache.
    #[serde(default = "default_cache_max_size")]
    pub cache_max_size: usize,

    #[serde(default = "default_cache_ttl_minutes")]
    pub cache_ttl_minutes: u64,

    /// Directory holding `<hash>_screenshot.bin` companions.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Path to the SQLite result store. Memory-only caching when unset.
    #[serde(default)]
    pub db_path: Option<PathBuf>,

    /// Newest persisted entries loaded into memory at startup.
    #[serde(default = "default_cache_preload_count")]
    pub cache_preload_count: usize,

    /// Domain allowlist; takes precedence over the denylist when non-empty.
    #[serde(default)]
    pub allowlist_domains: Vec<String>,

    #[serde(default)]
    pub denylist_domains: Vec<String>,

    /// Accept bare `example.com/path` tokens in chat text.
    #[serde(default)]
    pub allow_protocolless_urls: bool,

    #[serde(default = "default_protocol")]
    pub default_protocol: String,

    /// Analyze URLs found in plain (non-command) messages.
    #[serde(default = "default_true")]
    pub auto_analyze: bool,

    #[serde(default)]
    pub content_mode: ContentMode,

    /// Specific content kinds appended to each analysis (e.g. `images`, `links`).
    #[serde(default)]
    pub specific_extraction: Vec<String>,

    #[serde(default)]
    pub screenshot: ScreenshotConfig,

    #[serde(default)]
    pub llm: LlmConfig,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

fn default_user_agent() -> String {
    "linkscope/0.1".into()
}

fn default_max_bytes() -> usize {
    5_242_880 // 5MB
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    2_000
}

fn default_max_content_length() -> usize {
    10_000
}

fn default_max_concurrency() -> usize {
    5
}

fn default_cache_max_size() -> usize {
    100
}

fn default_cache_ttl_minutes() -> u64 {
    1_440
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./data/cache")
}

fn default_cache_preload_count() -> usize {
    20
}

fn default_protocol() -> String {
    "https".into()
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            user_agent: default_user_agent(),
            max_bytes: default_max_bytes(),
            timeout_ms: default_timeout_ms(),
            retry_count: default_retry_count(),
            retry_delay_ms: default_retry_delay_ms(),
            retry_backoff: RetryBackoff::Fixed,
            proxy: None,
            max_content_length: default_max_content_length(),
            max_concurrency: default_max_concurrency(),
            enable_cache: true,
            cache_max_size: default_cache_max_size(),
            cache_ttl_minutes: default_cache_ttl_minutes(),
            cache_dir: default_cache_dir(),
            db_path: None,
            cache_preload_count: default_cache_preload_count(),
            allowlist_domains: Vec::new(),
            denylist_domains: Vec::new(),
            allow_protocolless_urls: false,
            default_protocol: default_protocol(),
            auto_analyze: true,
            content_mode: ContentMode::Both,
            specific_extraction: Vec::new(),
            screenshot: ScreenshotConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_minutes * 60)
    }

    /// Concurrency bound clamped to `1..=MAX_CONCURRENCY_LIMIT`.
    pub fn effective_max_concurrency(&self) -> usize {
        self.max_concurrency.clamp(1, MAX_CONCURRENCY_LIMIT)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `LINKSCOPE_`
    /// 2. TOML file from `LINKSCOPE_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - The document's schema version is unknown
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut raw = Figment::new();

        if let Ok(config_path) = std::env::var("LINKSCOPE_CONFIG_FILE") {
            raw = raw.merge(Toml::file(&config_path));
        }

        raw = raw.merge(
            Env::prefixed("LINKSCOPE_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        Self::from_layers(raw)
    }

    /// Migrate, merge over defaults, and validate a set of raw layers.
    pub fn from_layers(raw: Figment) -> Result<Self, ConfigError> {
        let document: serde_json::Value =
            raw.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;
        let migrated = migration::migrate(document)?;

        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Serialized::defaults(migrated))
            .extract()
            .map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.schema_version, SCHEMA_VERSION);
        assert_eq!(config.user_agent, "linkscope/0.1");
        assert_eq!(config.max_bytes, 5_242_880);
        assert_eq!(config.timeout_ms, 30_000);
        assert_eq!(config.retry_count, 3);
        assert_eq!(config.max_concurrency, 5);
        assert_eq!(config.cache_max_size, 100);
        assert_eq!(config.cache_ttl_minutes, 1_440);
        assert_eq!(config.screenshot.ttl_secs, 60);
        assert_eq!(config.screenshot.memory_cache_size, 30);
        assert_eq!(config.screenshot.format, CaptureFormat::Jpeg);
        assert!(config.enable_cache);
        assert!(config.db_path.is_none());
        assert!(config.llm.endpoint.is_none());
    }

    #[test]
    fn test_durations() {
        let config = AppConfig::default();
        assert_eq!(config.timeout(), Duration::from_millis(30_000));
        assert_eq!(config.retry_delay(), Duration::from_millis(2_000));
        assert_eq!(config.cache_ttl(), Duration::from_secs(1_440 * 60));
        assert_eq!(config.screenshot.ttl(), Duration::from_secs(60));
    }

    #[test]
    fn test_effective_max_concurrency_clamps() {
        let low = AppConfig { max_concurrency: 0, ..Default::default() };
        assert_eq!(low.effective_max_concurrency(), 1);

        let high = AppConfig { max_concurrency: 500, ..Default::default() };
        assert_eq!(high.effective_max_concurrency(), MAX_CONCURRENCY_LIMIT);
    }

    #[test]
    fn test_content_mode_parse() {
        assert_eq!("both".parse::<ContentMode>().unwrap(), ContentMode::Both);
        assert_eq!("Screenshot_Only".parse::<ContentMode>().unwrap(), ContentMode::ScreenshotOnly);
        assert_eq!("analysis".parse::<ContentMode>().unwrap(), ContentMode::AnalysisOnly);
        assert!("video".parse::<ContentMode>().is_err());
        assert!(!ContentMode::AnalysisOnly.wants_screenshot());
        for mode in [ContentMode::Both, ContentMode::AnalysisOnly, ContentMode::ScreenshotOnly] {
            assert_eq!(mode.to_string().parse::<ContentMode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_crop_area_serde_as_array() {
        let area: CropArea = serde_json::from_str("[10, 20, 300, 400]").unwrap();
        assert_eq!(area, CropArea { x: 10, y: 20, width: 300, height: 400 });
        assert_eq!(serde_json::to_string(&area).unwrap(), "[10,20,300,400]");
    }

    #[test]
    fn test_from_layers_toml_and_env() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "linkscope.toml",
                r#"
                    max_concurrency = 8
                    content_mode = "analysis_only"

                    [screenshot]
                    format = "png"
                    crop = [0, 0, 640, 360]
                "#,
            )?;
            jail.set_env("LINKSCOPE_CACHE_MAX_SIZE", "42");

            let raw = Figment::new()
                .merge(Toml::file("linkscope.toml"))
                .merge(
                    Env::prefixed("LINKSCOPE_")
                        .map(|key| key.as_str().to_lowercase().into())
                        .split("__"),
                );

            let config = AppConfig::from_layers(raw).map_err(|e| e.to_string())?;
            assert_eq!(config.max_concurrency, 8);
            assert_eq!(config.cache_max_size, 42);
            assert_eq!(config.content_mode, ContentMode::AnalysisOnly);
            assert_eq!(config.screenshot.format, CaptureFormat::Png);
            let crop = CropArea { x: 0, y: 0, width: 640, height: 360 };
            assert_eq!(config.screenshot.crop, Some(crop));
            assert_eq!(config.screenshot.width, 1280);
            Ok(())
        });
    }

    #[test]
    fn test_from_layers_migrates_legacy_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "legacy.toml",
                r#"
                    request_timeout = 12
                    cache_expire_time = 30
                    screenshot_wait_time = 500
                "#,
            )?;

            let config = AppConfig::from_layers(Figment::new().merge(Toml::file("legacy.toml")))
                .map_err(|e| e.to_string())?;
            assert_eq!(config.schema_version, SCHEMA_VERSION);
            assert_eq!(config.timeout_ms, 12_000);
            assert_eq!(config.cache_ttl_minutes, 30);
            assert_eq!(config.screenshot.wait_ms, 500);
            Ok(())
        });
    }
}
