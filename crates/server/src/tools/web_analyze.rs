//! web_analyze tool implementation.
//!
//! Runs a batch of URLs through the analysis pipeline and reports one item
//! per distinct URL, in input order.

use std::path::PathBuf;

use linkscope_client::pipeline::AnalysisOutcome;
use linkscope_core::{ContentMode, Error, ErrorKind};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::app::App;
use crate::present::screenshot_path;
use crate::tools::json_result;

/// Input parameters for the web_analyze tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WebAnalyzeParams {
    /// URLs to analyze. Duplicates (after normalization) are analyzed once.
    pub urls: Vec<String>,

    /// "both", "analysis_only" or "screenshot_only". Defaults to the active mode.
    #[serde(default)]
    pub mode: Option<ContentMode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AnalyzedItem {
    pub url: String,
    pub ok: bool,
    pub title: Option<String>,
    /// Summary text, empty for screenshot-only results.
    pub text: Option<String>,
    /// Served from a cache tier rather than freshly fetched.
    pub cached: bool,
    /// Temp file holding the screenshot, if one was captured.
    pub screenshot_path: Option<PathBuf>,
    /// Human-readable failure description.
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

/// Output structure for the web_analyze tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WebAnalyzeOutput {
    pub mode: ContentMode,
    pub results: Vec<AnalyzedItem>,
}

pub async fn analyze_impl(app: &App, params: WebAnalyzeParams) -> Result<CallToolResult, McpError> {
    if params.urls.iter().all(|u| u.trim().is_empty()) {
        return Err(Error::InvalidInput("urls cannot be empty".into()).into());
    }

    let mode = params.mode.unwrap_or(app.mode());
    let outcomes = app.analyze(&params.urls, mode).await;

    let pipeline = &app.pipeline;
    let mut results = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        let item = match outcome {
            AnalysisOutcome::Done { result, cached } => {
                let path = if result.has_screenshot {
                    let bytes = result.screenshot.clone();
                    let dir = pipeline.companion_dir();
                    screenshot_path(pipeline.screenshots(), &result.url, bytes, dir).await
                } else {
                    None
                };
                AnalyzedItem {
                    url: result.url,
                    ok: true,
                    title: result.title,
                    text: Some(result.text),
                    cached,
                    screenshot_path: path,
                    error: None,
                    error_kind: None,
                }
            }
            AnalysisOutcome::Failed(failure) => AnalyzedItem {
                url: failure.url,
                ok: false,
                title: None,
                text: None,
                cached: false,
                screenshot_path: None,
                error: Some(failure.message),
                error_kind: Some(failure.kind),
            },
        };
        results.push(item);
    }

    json_result(&WebAnalyzeOutput { mode, results })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::app;

    #[tokio::test]
    async fn test_empty_urls_rejected() {
        let t = app();
        let params = WebAnalyzeParams { urls: vec![" ".into()], mode: None };
        let result = analyze_impl(&t.app, params).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_partial_failure_still_succeeds() {
        let t = app();
        let params = WebAnalyzeParams {
            urls: vec!["https://one.test".into(), "https://down.test".into()],
            mode: Some(ContentMode::AnalysisOnly),
        };
        let result = analyze_impl(&t.app, params).await.unwrap();
        assert_ne!(result.is_error, Some(true));
    }

    #[test]
    fn test_mode_parses_snake_case() {
        let raw = r#"{"urls": ["https://a.test"], "mode": "screenshot_only"}"#;
        let params: WebAnalyzeParams = serde_json::from_str(raw).unwrap();
        assert_eq!(params.mode, Some(ContentMode::ScreenshotOnly));
    }
}
