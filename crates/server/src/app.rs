//! Assembled application state shared by the tools and the command dispatcher.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use linkscope_client::fetch::{DomainPolicy, FetchClient, FetchConfig, normalize};
use linkscope_client::pipeline::{AnalysisOutcome, AnalysisPipeline, Failure, PipelineOptions};
use linkscope_client::summarize::LlmSummarizer;
use linkscope_core::{
    AnalysisResult, AppConfig, CacheDb, ContentMode, Error, ResultCache, ScreenshotStore,
};
use tokio::task::JoinHandle;

/// How often expired results are purged from every cache tier.
const PURGE_INTERVAL: Duration = Duration::from_secs(600);

pub struct App {
    pub config: AppConfig,
    pub pipeline: AnalysisPipeline,
    pub policy: DomainPolicy,
    /// Mode for commands and auto-analysis. Starts at `config.content_mode`.
    mode: RwLock<ContentMode>,
}

impl App {
    /// Build the fetch client, caches, optional summarizer and capturer, and the pipeline.
    pub async fn build(config: AppConfig) -> Result<Self, Error> {
        let fetcher = Arc::new(FetchClient::new(FetchConfig::from(&config))?);
        let cache = Arc::new(ResultCache::<AnalysisResult>::new(
            config.cache_max_size,
            config.cache_ttl(),
        ));
        let screenshots = Arc::new(ScreenshotStore::from_config(&config.screenshot));

        let options = PipelineOptions::from(&config);
        let mut pipeline = AnalysisPipeline::new(options, fetcher, cache, screenshots);

        if let Some(summarizer) = LlmSummarizer::from_config(&config.llm)? {
            tracing::info!(model = %config.llm.model, "LLM summaries enabled");
            pipeline = pipeline.with_summarizer(Arc::new(summarizer));
        }

        #[cfg(feature = "render")]
        if config.screenshot.enabled {
            match linkscope_client::render::HeadlessCapturer::launch(&config.screenshot).await {
                Ok(capturer) => pipeline = pipeline.with_capturer(Arc::new(capturer)),
                Err(e) => tracing::warn!("screenshots unavailable: {e}"),
            }
        }

        if config.enable_cache
            && let Some(path) = &config.db_path
        {
            let db = CacheDb::open(path).await?;
            tracing::info!(path = %path.display(), "Persistent cache opened");
            pipeline = pipeline.with_db(db);
        }

        Ok(Self::from_parts(config, pipeline))
    }

    pub fn from_parts(config: AppConfig, pipeline: AnalysisPipeline) -> Self {
        let policy = DomainPolicy::from_config(&config);
        let mode = RwLock::new(config.content_mode);
        Self { config, pipeline, policy, mode }
    }

    pub fn mode(&self) -> ContentMode {
        *self.mode.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Switch the runtime content mode. Returns the previous one.
    pub fn set_mode(&self, mode: ContentMode) -> ContentMode {
        let mut slot = self.mode.write().unwrap_or_else(PoisonError::into_inner);
        let previous = std::mem::replace(&mut *slot, mode);
        tracing::info!(?previous, ?mode, "Content mode changed");
        previous
    }

    /// Warm caches and start background maintenance.
    pub async fn start(self: &Arc<Self>) -> JoinHandle<()> {
        self.pipeline.preload(self.config.cache_preload_count).await;
        self.pipeline.screenshots().spawn_reaper();

        let app = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PURGE_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                app.pipeline.purge_expired().await;
            }
        })
    }

    /// Stop `maintenance` and wait for it, then close the pipeline.
    pub async fn shutdown(&self, maintenance: JoinHandle<()>) {
        maintenance.abort();
        if let Err(e) = maintenance.await
            && !e.is_cancelled()
        {
            tracing::warn!("maintenance task failed: {e}");
        }
        self.pipeline.shutdown().await;
    }

    /// Analyze `urls`, rejecting domains the policy blocks.
    ///
    /// Duplicates are analyzed once; outcomes keep first-seen order.
    pub async fn analyze<S: AsRef<str>>(
        &self,
        urls: &[S],
        mode: ContentMode,
    ) -> Vec<AnalysisOutcome> {
        let mut seen = std::collections::HashSet::new();
        let mut slots: Vec<Option<AnalysisOutcome>> = Vec::new();
        let mut allowed: Vec<&str> = Vec::new();

        for raw in urls.iter().map(AsRef::as_ref) {
            let normalized = normalize(raw);
            if !seen.insert(normalized.clone().unwrap_or_else(|_| raw.trim().to_string())) {
                continue;
            }
            match normalized {
                Ok(url) if !self.policy.is_allowed(&url) => {
                    tracing::info!(%url, "domain blocked by policy");
                    let err = Error::DomainBlocked(url.clone());
                    slots.push(Some(AnalysisOutcome::Failed(Failure::from_error(&url, &err))));
                }
                _ => {
                    slots.push(None);
                    allowed.push(raw);
                }
            }
        }

        let mut analyzed = self.pipeline.process_batch_mode(&allowed, mode).await.into_iter();
        slots.into_iter().filter_map(|slot| slot.or_else(|| analyzed.next())).collect()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use linkscope_core::ErrorKind;

    #[tokio::test]
    async fn test_analyze_blocks_denied_domains_in_order() {
        let t = app_with(AppConfig {
            denylist_domains: vec!["blocked.test".into()],
            content_mode: ContentMode::AnalysisOnly,
            ..Default::default()
        });

        let urls = [
            "https://one.test",
            "https://cdn.blocked.test/x",
            "https://two.test",
            "https://one.test/",
        ];
        let outcomes = t.app.analyze(&urls, ContentMode::AnalysisOnly).await;

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].url(), "https://one.test/");
        assert!(outcomes[0].is_done());
        let AnalysisOutcome::Failed(blocked) = &outcomes[1] else { panic!("expected block") };
        assert_eq!(blocked.kind, ErrorKind::Policy);
        assert_eq!(outcomes[2].url(), "https://two.test/");
    }

    #[tokio::test]
    async fn test_mode_starts_from_config_and_switches() {
        let t = app();
        assert_eq!(t.app.mode(), ContentMode::AnalysisOnly);
        assert_eq!(t.app.set_mode(ContentMode::ScreenshotOnly), ContentMode::AnalysisOnly);
        assert_eq!(t.app.mode(), ContentMode::ScreenshotOnly);
        assert_eq!(t.app.config.content_mode, ContentMode::AnalysisOnly);
    }

    #[tokio::test]
    async fn test_shutdown_joins_maintenance() {
        let t = app();
        let maintenance = t.app.start().await;
        assert_eq!(Arc::strong_count(&t.app), 2);

        t.app.shutdown(maintenance).await;
        // The aborted task has dropped its handle on the app.
        assert_eq!(Arc::strong_count(&t.app), 1);
    }

    #[tokio::test]
    async fn test_analyze_reports_every_failure() {
        let t = app();
        let urls = ["https://down.test", "::::"];
        let outcomes = t.app.analyze(&urls, ContentMode::AnalysisOnly).await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| !o.is_done()));
    }
}
