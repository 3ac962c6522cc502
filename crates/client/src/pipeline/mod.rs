//! URL analysis pipeline.
//!
//! One run takes a URL through:
//!
//! 1. normalization and validation
//! 2. a concurrency permit (held until the run returns, whatever the outcome)
//! 3. memory cache, then the persistent tier
//! 4. fetch, extract, content-hash alias lookup
//! 5. summary (or fallback excerpt) plus the specific-content appendix
//! 6. screenshot when the content mode asks for one
//! 7. cache write: memory, SQLite, companion file
//!
//! Screenshot-only runs skip steps 4 and 5 and use their own cache key.
//! Every failure is reported as an [`AnalysisOutcome::Failed`] value.

pub mod stage;

use futures_util::future::join_all;
use linkscope_core::cache::hash::result_key;
use linkscope_core::cache::{CacheStats, ScreenshotStats};
use linkscope_core::config::AppConfig;
use linkscope_core::{
    AnalysisResult, CacheDb, ContentMode, Error, ErrorKind, ResultCache, ScreenshotStore,
};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use url::Url;

use crate::extract::{SpecificKind, extract_response, extract_specific};
use crate::fetch::{PageFetcher, canonicalize, is_valid, normalize};
use crate::render::{CaptureOptions, Capturer, DisabledCapturer, capture_with_crop};
use crate::summarize::{Summarizer, fallback_excerpt};

pub use stage::{Activity, ActivityGauge, Stage, StageTracker};

/// Why a URL could not be analyzed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    pub url: String,
    pub kind: ErrorKind,
    /// Short user-facing text, see [`Error::user_message`].
    pub message: String,
}

impl Failure {
    pub fn from_error(url: &str, err: &Error) -> Self {
        Self { url: url.to_string(), kind: err.kind(), message: err.user_message(Some(url)) }
    }
}

/// Result of one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    Done { result: AnalysisResult, cached: bool },
    Failed(Failure),
}

impl AnalysisOutcome {
    pub fn url(&self) -> &str {
        match self {
            AnalysisOutcome::Done { result, .. } => &result.url,
            AnalysisOutcome::Failed(failure) => &failure.url,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, AnalysisOutcome::Done { .. })
    }

    pub fn result(&self) -> Option<&AnalysisResult> {
        match self {
            AnalysisOutcome::Done { result, .. } => Some(result),
            AnalysisOutcome::Failed(_) => None,
        }
    }
}

/// Pipeline knobs derived from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub max_concurrency: usize,
    pub max_content_length: usize,
    pub content_mode: ContentMode,
    pub specific_kinds: Vec<SpecificKind>,
    pub enable_cache: bool,
    pub cache_dir: PathBuf,
    pub screenshots_enabled: bool,
    pub capture: CaptureOptions,
}

impl From<&AppConfig> for PipelineOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_concurrency: config.effective_max_concurrency(),
            max_content_length: config.max_content_length,
            content_mode: config.content_mode,
            specific_kinds: SpecificKind::parse_list(&config.specific_extraction),
            enable_cache: config.enable_cache,
            cache_dir: config.cache_dir.clone(),
            screenshots_enabled: config.screenshot.enabled,
            capture: CaptureOptions::from(&config.screenshot),
        }
    }
}

/// Counts reported by [`AnalysisPipeline::purge_expired`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, schemars::JsonSchema)]
pub struct PurgeStats {
    /// Expired rows deleted from the persistent tier.
    pub persisted: usize,
    /// Companion screenshot files deleted.
    pub companions: usize,
    /// Expired in-memory entries dropped.
    pub memory: usize,
}

/// Combined cache and activity counters.
#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct PipelineStats {
    pub results: CacheStats,
    /// Rows in the persistent tier, when one is configured.
    pub persisted: Option<u64>,
    pub screenshots: ScreenshotStats,
    pub activity: Activity,
}

/// Drives URLs from text to cached [`AnalysisResult`]s.
pub struct AnalysisPipeline {
    fetcher: Arc<dyn PageFetcher>,
    summarizer: Option<Arc<dyn Summarizer>>,
    capturer: Arc<dyn Capturer>,
    cache: Arc<ResultCache<AnalysisResult>>,
    db: Option<CacheDb>,
    screenshots: Arc<ScreenshotStore>,
    permits: Arc<Semaphore>,
    gauge: Arc<ActivityGauge>,
    options: PipelineOptions,
}

impl AnalysisPipeline {
    /// Pipeline with no summarizer, no screenshot backend, and no persistent tier.
    pub fn new(
        options: PipelineOptions,
        fetcher: Arc<dyn PageFetcher>,
        cache: Arc<ResultCache<AnalysisResult>>,
        screenshots: Arc<ScreenshotStore>,
    ) -> Self {
        Self {
            fetcher,
            summarizer: None,
            capturer: Arc::new(DisabledCapturer),
            cache,
            db: None,
            screenshots,
            permits: Arc::new(Semaphore::new(options.max_concurrency.max(1))),
            gauge: Arc::new(ActivityGauge::default()),
            options,
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_capturer(mut self, capturer: Arc<dyn Capturer>) -> Self {
        self.capturer = capturer;
        self
    }

    pub fn with_db(mut self, db: CacheDb) -> Self {
        self.db = Some(db);
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn screenshots(&self) -> &Arc<ScreenshotStore> {
        &self.screenshots
    }

    /// Directory holding companion screenshot files, when a persistent tier exists.
    pub fn companion_dir(&self) -> Option<&Path> {
        self.db.as_ref().map(|_| self.options.cache_dir.as_path())
    }

    pub fn activity(&self) -> Activity {
        self.gauge.snapshot()
    }

    /// Analyze one URL with the configured content mode.
    pub async fn process(&self, url: &str) -> AnalysisOutcome {
        self.process_mode(url, self.options.content_mode).await
    }

    /// Analyze one URL with an explicit content mode.
    pub async fn process_mode(&self, raw_url: &str, mode: ContentMode) -> AnalysisOutcome {
        let normalized = match normalize(raw_url) {
            Ok(normalized) if is_valid(&normalized) => normalized,
            Ok(normalized) => {
                let err = Error::InvalidUrl(normalized.clone());
                return AnalysisOutcome::Failed(Failure::from_error(&normalized, &err));
            }
            Err(e) => {
                let err = Error::InvalidUrl(e.to_string());
                return AnalysisOutcome::Failed(Failure::from_error(raw_url.trim(), &err));
            }
        };

        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                let err = Error::InvalidInput("pipeline closed".into());
                return AnalysisOutcome::Failed(Failure::from_error(&normalized, &err));
            }
        };

        let mut tracker = StageTracker::new(normalized.as_str(), Arc::clone(&self.gauge));
        match self.run(&normalized, mode, &mut tracker).await {
            Ok((result, cached)) => {
                tracker.advance(Stage::Done);
                AnalysisOutcome::Done { result, cached }
            }
            Err(e) => {
                tracker.fail(e.kind());
                tracing::warn!(url = %normalized, "analysis failed: {e}");
                AnalysisOutcome::Failed(Failure::from_error(&normalized, &e))
            }
        }
    }

    /// Analyze several URLs concurrently with the configured content mode.
    ///
    /// Duplicates (after normalization) are analyzed once. Outcomes follow
    /// the order of first appearance.
    pub async fn process_batch<S: AsRef<str>>(&self, urls: &[S]) -> Vec<AnalysisOutcome> {
        self.process_batch_mode(urls, self.options.content_mode).await
    }

    pub async fn process_batch_mode<S: AsRef<str>>(
        &self,
        urls: &[S],
        mode: ContentMode,
    ) -> Vec<AnalysisOutcome> {
        let mut seen = HashSet::new();
        let unique: Vec<&str> = urls
            .iter()
            .map(AsRef::as_ref)
            .filter(|url| seen.insert(normalize(url).unwrap_or_else(|_| url.trim().to_string())))
            .collect();

        join_all(unique.into_iter().map(|url| self.process_mode(url, mode))).await
    }

    async fn run(
        &self,
        normalized: &str,
        mode: ContentMode,
        tracker: &mut StageTracker,
    ) -> Result<(AnalysisResult, bool), Error> {
        let key = result_key(normalized, mode);

        if self.options.enable_cache
            && let Some(hit) = self.lookup(&key, mode).await
        {
            return Ok((hit, true));
        }

        let url = canonicalize(normalized).map_err(|e| Error::InvalidUrl(e.to_string()))?;

        if mode == ContentMode::ScreenshotOnly {
            if !self.options.screenshots_enabled {
                return Err(Error::RenderDisabled);
            }
            tracker.advance(Stage::Screenshotting);
            let shot = self.screenshot(&url, normalized).await?;

            tracker.advance(Stage::Caching);
            let result = AnalysisResult::new(normalized, None, String::new(), Some(shot));
            self.store(&key, &result, None).await;
            return Ok((result, false));
        }

        tracker.advance(Stage::Fetching);
        let response = self.fetcher.fetch(&url).await?;

        tracker.advance(Stage::Extracting);
        let content = extract_response(&response, self.options.max_content_length)?;

        if self.options.enable_cache
            && let Some(hit) = self.cache.get_by_content(&content.text).await
            && (hit.has_screenshot || !self.wants_screenshot(mode))
        {
            tracing::debug!(url = %normalized, "content matches a cached page");
            let screenshot = if mode.wants_screenshot() { hit.screenshot.clone() } else { None };
            let result = AnalysisResult {
                url: normalized.to_string(),
                ..hit.with_screenshot(screenshot)
            };
            self.cache.set(&key, result.clone()).await;
            return Ok((result, true));
        }

        tracker.advance(Stage::Summarizing);
        let summary = match &self.summarizer {
            Some(summarizer) => summarizer.summarize(&content).await,
            None => None,
        };
        let mut text = summary.unwrap_or_else(|| fallback_excerpt(&content));

        if !self.options.specific_kinds.is_empty() {
            let specific = extract_specific(
                &response.text(),
                &response.final_url,
                &self.options.specific_kinds,
            );
            text.push_str(&specific.to_markdown());
        }

        let screenshot = if self.wants_screenshot(mode) {
            tracker.advance(Stage::Screenshotting);
            match self.screenshot(&url, normalized).await {
                Ok(shot) => Some(shot),
                Err(e) => {
                    tracing::warn!(url = %normalized, "continuing without screenshot: {e}");
                    None
                }
            }
        } else {
            None
        };

        tracker.advance(Stage::Caching);
        let result = AnalysisResult::new(normalized, content.title.clone(), text, screenshot);
        self.store(&key, &result, Some(&content.text)).await;
        Ok((result, false))
    }

    fn wants_screenshot(&self, mode: ContentMode) -> bool {
        self.options.screenshots_enabled && mode.wants_screenshot()
    }

    async fn screenshot(&self, url: &Url, normalized: &str) -> Result<bytes::Bytes, Error> {
        let shot = capture_with_crop(self.capturer.as_ref(), url, &self.options.capture).await?;
        self.screenshots.put_to_memory(normalized, shot.clone()).await;
        Ok(shot)
    }

    /// Memory tier, then the persistent tier. Persistent hits are promoted.
    async fn lookup(&self, key: &str, mode: ContentMode) -> Option<AnalysisResult> {
        if let Some(hit) = self.cache.get(key).await {
            return Some(hit);
        }

        let db = self.db.as_ref()?;
        let entry = match db.get_entry(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(%key, "persistent cache read failed: {e}");
                return None;
            }
        };

        let screenshot = if entry.has_screenshot {
            match self.screenshots.load_from_disk(&entry.url, &self.options.cache_dir).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(%key, "companion read failed: {e}");
                    None
                }
            }
        } else {
            None
        };

        if mode == ContentMode::ScreenshotOnly && screenshot.is_none() {
            return None;
        }

        tracing::debug!(%key, "persistent cache hit");
        let result = entry.into_result(screenshot);
        if let Some(shot) = &result.screenshot {
            self.screenshots.put_to_memory(&result.url, shot.clone()).await;
        }
        self.cache.set(key, result.clone()).await;
        Some(result)
    }

    /// Write-through to every tier. Failures are logged and skipped.
    async fn store(&self, key: &str, result: &AnalysisResult, content: Option<&str>) {
        if !self.options.enable_cache {
            return;
        }

        match content {
            Some(content) => {
                self.cache.set_with_content_hash(key, result.clone(), content).await;
            }
            None => self.cache.set(key, result.clone()).await,
        }

        let Some(db) = &self.db else {
            return;
        };
        if let Err(e) = db.put_entry(key, result, self.cache.ttl()).await {
            tracing::warn!(%key, "persistent cache write failed: {e}");
        }
        if let Some(shot) = &result.screenshot
            && let Err(e) = self
                .screenshots
                .write_companion(&result.url, shot, &self.options.cache_dir)
                .await
        {
            tracing::warn!(%key, "companion write failed: {e}");
        }
    }

    /// Warm the memory cache with the `count` newest persisted results.
    ///
    /// Returns how many entries were loaded.
    pub async fn preload(&self, count: usize) -> usize {
        let Some(db) = &self.db else {
            return 0;
        };
        if count == 0 || !self.options.enable_cache {
            return 0;
        }

        let entries = match db.recent_entries(count).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("cache preload failed: {e}");
                return 0;
            }
        };

        let mut loaded = 0;
        // Oldest first so the newest entries are the last to be evicted.
        for entry in entries.into_iter().rev() {
            let screenshot = if entry.has_screenshot {
                self.screenshots
                    .load_from_disk(&entry.url, &self.options.cache_dir)
                    .await
                    .ok()
                    .flatten()
            } else {
                None
            };
            let key = entry.cache_key.clone();
            self.cache.set(&key, entry.into_result(screenshot)).await;
            loaded += 1;
        }

        tracing::info!(loaded, "Preloaded result cache");
        loaded
    }

    /// Drop expired results from every tier, including companion files.
    pub async fn purge_expired(&self) -> PurgeStats {
        let mut stats = PurgeStats {
            memory: self.cache.sweep_expired().await,
            ..Default::default()
        };

        if let Some(db) = &self.db {
            match db.purge_expired_entries().await {
                Ok(expired) => {
                    stats.persisted = expired.len();
                    for entry in expired.iter().filter(|entry| entry.has_screenshot) {
                        // Another mode's row for the same URL may still read this file.
                        match db.has_live_screenshot(&entry.url).await {
                            Ok(false) => {}
                            Ok(true) => continue,
                            Err(e) => {
                                tracing::warn!(
                                    url = %entry.url,
                                    "companion kept, liveness check failed: {e}"
                                );
                                continue;
                            }
                        }
                        let removed = self
                            .screenshots
                            .remove_companion(&entry.url, &self.options.cache_dir)
                            .await;
                        match removed {
                            Ok(true) => stats.companions += 1,
                            Ok(false) => {}
                            Err(e) => {
                                tracing::warn!(url = %entry.url, "companion delete failed: {e}")
                            }
                        }
                    }
                }
                Err(e) => tracing::warn!("persistent purge failed: {e}"),
            }
        }

        if stats != PurgeStats::default() {
            tracing::info!(?stats, "Purged expired results");
        }
        stats
    }

    /// Empty every tier. Returns the number of persisted rows removed.
    pub async fn clear_cache(&self) -> Result<u64, Error> {
        self.cache.clear().await;
        self.screenshots.clear_all().await;

        let Some(db) = &self.db else {
            return Ok(0);
        };

        let total = db.count_entries().await?;
        let entries = db.recent_entries(usize::try_from(total).unwrap_or(usize::MAX)).await?;
        for entry in entries.iter().filter(|entry| entry.has_screenshot) {
            if let Err(e) = self
                .screenshots
                .remove_companion(&entry.url, &self.options.cache_dir)
                .await
            {
                tracing::warn!(url = %entry.url, "companion delete failed: {e}");
            }
        }
        db.clear_entries().await
    }

    /// Close the capture backend and stop the screenshot reaper.
    pub async fn shutdown(&self) {
        self.capturer.shutdown().await;
        self.screenshots.shutdown().await;
    }

    /// Live in-memory results that carry text, one per URL, oldest first.
    pub async fn cached_results(&self) -> Vec<AnalysisResult> {
        let mut seen = HashSet::new();
        self.cache
            .live_values()
            .await
            .into_iter()
            .filter(|result| !result.text.is_empty() && seen.insert(result.url.clone()))
            .collect()
    }

    pub async fn stats(&self) -> PipelineStats {
        let persisted = match &self.db {
            Some(db) => db.count_entries().await.ok(),
            None => None,
        };
        PipelineStats {
            results: self.cache.stats().await,
            persisted,
            screenshots: self.screenshots.stats().await,
            activity: self.activity(),
        }
    }
}
