//! Finished analysis of a single page.

use bytes::Bytes;
use serde::Serialize;

/// Result of analyzing one URL.
///
/// Immutable once built. The screenshot is held as [`Bytes`] so clones handed
/// out by the caches share the same buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub url: String,
    pub title: Option<String>,
    /// Summary (or fallback excerpt) plus any specific-content appendix.
    pub text: String,
    #[serde(skip)]
    pub screenshot: Option<Bytes>,
    pub has_screenshot: bool,
    /// RFC 3339 timestamp.
    pub analyzed_at: String,
}

impl AnalysisResult {
    pub fn new(
        url: impl Into<String>,
        title: Option<String>,
        text: impl Into<String>,
        screenshot: Option<Bytes>,
    ) -> Self {
        let has_screenshot = screenshot.is_some();
        Self {
            url: url.into(),
            title,
            text: text.into(),
            screenshot,
            has_screenshot,
            analyzed_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Same result with a different screenshot payload.
    pub fn with_screenshot(&self, screenshot: Option<Bytes>) -> Self {
        Self { has_screenshot: screenshot.is_some(), screenshot, ..self.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_screenshot_tracks_payload() {
        let result = AnalysisResult::new("https://example.com/", None, "text", None);
        assert!(!result.has_screenshot);

        let with = result.with_screenshot(Some(Bytes::from_static(b"\xff\xd8")));
        assert!(with.has_screenshot);
        assert_eq!(with.text, "text");
        assert!(chrono::DateTime::parse_from_rfc3339(&with.analyzed_at).is_ok());
    }

    #[test]
    fn test_clone_shares_screenshot_buffer() {
        let bytes = Bytes::from(vec![1u8; 1024]);
        let result = AnalysisResult::new("https://example.com/", None, "text", Some(bytes.clone()));
        let cloned = result.clone();
        let (a, b) = (result.screenshot.unwrap(), cloned.screenshot.unwrap());
        assert_eq!(a.as_ptr(), b.as_ptr());
    }
}
