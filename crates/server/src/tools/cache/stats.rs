//! cache_stats tool implementation.

use rmcp::{ErrorData as McpError, model::CallToolResult};

use crate::app::App;
use crate::tools::json_result;

/// Report result cache, persistent tier, screenshot store, and activity counters.
pub async fn stats_impl(app: &App) -> Result<CallToolResult, McpError> {
    let stats = app.pipeline.stats().await;
    json_result(&stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::app;
    use linkscope_core::ContentMode;

    #[tokio::test]
    async fn test_stats_counts_results() {
        let t = app();
        t.app.analyze(&["https://one.test", "https://two.test"], ContentMode::AnalysisOnly).await;

        let result = stats_impl(&t.app).await.unwrap();
        assert_ne!(result.is_error, Some(true));

        let stats = t.app.pipeline.stats().await;
        assert_eq!(stats.results.valid, 2);
        assert_eq!(stats.persisted, None);
    }
}
