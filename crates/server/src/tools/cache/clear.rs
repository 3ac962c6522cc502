//! cache_clear tool implementation.
//!
//! Empties the memory cache, the screenshot store, and the persistent tier.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::app::App;
use crate::tools::json_result;

/// Output from the cache_clear tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheClearOutput {
    /// Persisted rows removed.
    pub removed: u64,
}

pub async fn clear_impl(app: &App) -> Result<CallToolResult, McpError> {
    let removed = app.pipeline.clear_cache().await?;
    tracing::info!(removed, "cache cleared");
    json_result(&CacheClearOutput { removed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::app;
    use linkscope_core::ContentMode;

    #[tokio::test]
    async fn test_clear_empties_memory_tier() {
        let t = app();
        t.app.analyze(&["https://one.test"], ContentMode::AnalysisOnly).await;
        assert_eq!(t.app.pipeline.stats().await.results.total, 1);

        clear_impl(&t.app).await.unwrap();
        assert_eq!(t.app.pipeline.stats().await.results.total, 0);
    }
}
