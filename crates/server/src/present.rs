//! Renders pipeline outcomes as chat text plus screenshot attachments.

use std::path::{Path, PathBuf};

use linkscope_client::pipeline::AnalysisOutcome;
use linkscope_core::ScreenshotStore;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Text reply and the screenshot files the host should attach to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Presentation {
    pub text: String,
    /// Temp files owned by the screenshot store; valid until the reaper expires them.
    pub screenshots: Vec<PathBuf>,
    /// Other documents to attach, such as exports.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<PathBuf>,
}

impl Presentation {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), ..Default::default() }
    }
}

/// Render `outcomes` in order. Every failure gets its own block, so a batch
/// where nothing succeeded still explains each URL.
pub async fn present(
    outcomes: &[AnalysisOutcome],
    store: &ScreenshotStore,
    companion_dir: Option<&Path>,
) -> Presentation {
    let mut blocks = Vec::with_capacity(outcomes.len() + 1);
    let mut screenshots = Vec::new();

    if outcomes.len() > 1 {
        let failed = outcomes.iter().filter(|o| !o.is_done()).count();
        let mut header = format!("Analyzed {} links", outcomes.len());
        if failed > 0 {
            header.push_str(&format!(" ({failed} failed)"));
        }
        blocks.push(header);
    }

    for outcome in outcomes {
        match outcome {
            AnalysisOutcome::Done { result, cached } => {
                let mut block = match &result.title {
                    Some(title) => format!("📄 {title}\n🔗 {}", result.url),
                    None => format!("🔗 {}", result.url),
                };
                if !result.text.is_empty() {
                    block.push_str("\n\n");
                    block.push_str(&result.text);
                }
                if *cached {
                    block.push_str("\n\n(cached)");
                }
                blocks.push(block);

                if result.has_screenshot {
                    let shot = result.screenshot.clone();
                    let path = screenshot_path(store, &result.url, shot, companion_dir).await;
                    screenshots.extend(path);
                }
            }
            AnalysisOutcome::Failed(failure) => blocks.push(failure.message.clone()),
        }
    }

    Presentation { text: blocks.join("\n\n---\n\n"), screenshots, files: Vec::new() }
}

pub(crate) async fn screenshot_path(
    store: &ScreenshotStore,
    url: &str,
    bytes: Option<bytes::Bytes>,
    companion_dir: Option<&Path>,
) -> Option<PathBuf> {
    let resolved = match bytes {
        Some(bytes) => store.get_or_create_temp_path(url, Some(bytes), None).await,
        None => store.path_for_send(url, companion_dir).await,
    };
    match resolved {
        Ok(path) => path,
        Err(e) => {
            tracing::warn!(%url, "screenshot not attached: {e}");
            None
        }
    }
}
