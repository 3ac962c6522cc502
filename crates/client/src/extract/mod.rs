//! Readable content extraction using scraper.
//!
//! ### Main text
//! - Root: first of `article`, `main`, `[role=main]`, `body`, else the whole document.
//! - Text comes from block elements only (paragraphs, headings, list items,
//!   quotes, preformatted blocks, table cells); nested blocks are not repeated.
//! - Pages with no block elements fall back to the root's visible text.
//! - Whitespace is collapsed and the result truncated to a character budget.
//!
//! ### Metadata
//! - Title: `<title>`, then `og:title`, then the first `<h1>`.
//! - Description: `meta[name=description]`, then `og:description`.

pub mod links;
pub mod specific;

pub use links::{Link, extract_links};
pub use specific::{SpecificContent, SpecificKind, extract_specific};

use linkscope_core::Error;
use scraper::{ElementRef, Html, Node, Selector};
use serde::Serialize;
use url::Url;

use crate::fetch::FetchResponse;

const BLOCK_TAGS: &[&str] = &[
    "p",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "li",
    "blockquote",
    "pre",
    "td",
    "th",
    "dd",
    "dt",
    "figcaption",
];

const INVISIBLE_TAGS: &[&str] = &["script", "style", "noscript", "template", "svg", "head"];

/// Structured content pulled from one page.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractedContent {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Main text, whitespace collapsed, at most `max_content_length` characters.
    pub text: String,
    /// Whether `text` was cut to fit the character budget.
    pub truncated: bool,
    pub word_count: usize,
    pub links: Vec<Link>,
}

fn selector(css: &str) -> Result<Selector, Error> {
    Selector::parse(css).map_err(|e| Error::ExtractFailed(format!("bad selector {css}: {e}")))
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first_text(document: &Html, css: &str) -> Result<Option<String>, Error> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .find(|text| !text.is_empty()))
}

fn first_attr(document: &Html, css: &str, attr: &str) -> Result<Option<String>, Error> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .filter_map(|el| el.value().attr(attr))
        .map(collapse_whitespace)
        .find(|text| !text.is_empty()))
}

fn has_block_ancestor(element: &ElementRef<'_>, root: &ElementRef<'_>) -> bool {
    element
        .ancestors()
        .take_while(|node| node.id() != root.id())
        .filter_map(ElementRef::wrap)
        .any(|ancestor| BLOCK_TAGS.contains(&ancestor.value().name()))
}

/// Visible text under `element`, skipping scripts, styles, and similar.
fn visible_text(element: &ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in element.descendants() {
        let Node::Text(text) = node.value() else { continue };
        let hidden = node
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|ancestor| INVISIBLE_TAGS.contains(&ancestor.value().name()));
        if !hidden {
            out.push_str(text);
            out.push(' ');
        }
    }
    collapse_whitespace(&out)
}

fn main_text(document: &Html) -> Result<String, Error> {
    let mut root = None;
    for css in ["article", "main", "[role=main]", "body"] {
        let sel = selector(css)?;
        if let Some(found) = document.select(&sel).next() {
            root = Some(found);
            break;
        }
    }
    let root = root.unwrap_or_else(|| document.root_element());

    let blocks = selector(&BLOCK_TAGS.join(", "))?;
    let parts: Vec<String> = root
        .select(&blocks)
        .filter(|el| !has_block_ancestor(el, &root))
        .map(|el| visible_text(&el))
        .filter(|text| !text.is_empty())
        .collect();

    if parts.is_empty() { Ok(visible_text(&root)) } else { Ok(parts.join("\n")) }
}

fn truncate_chars(text: String, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (text[..byte_idx].to_string(), true),
        None => (text, false),
    }
}

/// Extract title, description, main text, and links from an HTML document.
///
/// # Errors
///
/// Returns `Error::ContentEmpty` when the page has no readable text.
pub fn extract(
    html: &str,
    url: &Url,
    max_content_length: usize,
) -> Result<ExtractedContent, Error> {
    let document = Html::parse_document(html);

    let title = match first_text(&document, "title")? {
        Some(title) => Some(title),
        None => match first_attr(&document, r#"meta[property="og:title"]"#, "content")? {
            Some(title) => Some(title),
            None => first_text(&document, "h1")?,
        },
    };
    let description = match first_attr(&document, r#"meta[name="description"]"#, "content")? {
        Some(description) => Some(description),
        None => first_attr(&document, r#"meta[property="og:description"]"#, "content")?,
    };

    let text = main_text(&document)?;
    if text.is_empty() {
        return Err(Error::ContentEmpty(url.to_string()));
    }

    let word_count = text.split_whitespace().count();
    let (text, truncated) = truncate_chars(text, max_content_length);

    Ok(ExtractedContent {
        url: url.to_string(),
        title,
        description,
        text,
        truncated,
        word_count,
        links: extract_links(html, url),
    })
}

/// Whether a Content-Type header names something we can read as markup or text.
fn is_textual(content_type: &str) -> bool {
    let mime = content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    mime.starts_with("text/") || mime.contains("html") || mime.contains("xml")
}

/// Extract from a fetched response, rejecting non-text payloads.
///
/// # Errors
///
/// Returns `Error::ExtractFailed` for binary content types and
/// `Error::ContentEmpty` when no text is found.
pub fn extract_response(
    response: &FetchResponse,
    max_content_length: usize,
) -> Result<ExtractedContent, Error> {
    if let Some(content_type) = &response.content_type
        && !is_textual(content_type)
    {
        return Err(Error::ExtractFailed(format!("unsupported content type {content_type}")));
    }
    extract(&response.text(), &response.final_url, max_content_length)
}
