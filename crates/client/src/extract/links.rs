//! Link harvesting from HTML documents.

use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

use super::collapse_whitespace;

/// A harvested link with text and href.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Link {
    /// Link text content, whitespace collapsed
    pub text: String,
    /// Resolved absolute href
    pub href: String,
}

/// Extract http(s) links from an HTML document, resolving relative URLs against the base URL.
///
/// In-page anchors (`#section`) and non-web schemes (`mailto:`, `javascript:`)
/// are skipped. Duplicates (by resolved href) keep the first occurrence.
pub fn extract_links(html: &str, base_url: &Url) -> Vec<Link> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let document = Html::parse_document(html);

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href").map(str::trim) else {
            continue;
        };
        if href.is_empty() || href.starts_with('#') {
            continue;
        }

        let Ok(resolved) = base_url.join(href) else {
            continue;
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }

        let resolved = resolved.to_string();
        if !seen.insert(resolved.clone()) {
            continue;
        }

        let text = collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "));
        let text = if text.is_empty() { "[link]".to_string() } else { text };

        links.push(Link { text, href: resolved });
    }

    links
}
