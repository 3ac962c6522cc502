//! Targeted extraction of media, structure, and metadata from a page.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::str::FromStr;

use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use url::Url;

use super::collapse_whitespace;

/// Kinds of page elements that can be pulled out on request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecificKind {
    Images,
    Links,
    Videos,
    Audios,
    Quotes,
    Headings,
    Code,
    Tables,
    Lists,
    Meta,
}

impl FromStr for SpecificKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "images" | "image" => Ok(Self::Images),
            "links" | "link" => Ok(Self::Links),
            "videos" | "video" => Ok(Self::Videos),
            "audios" | "audio" => Ok(Self::Audios),
            "quotes" | "quote" => Ok(Self::Quotes),
            "headings" | "heading" => Ok(Self::Headings),
            "code" | "code_blocks" => Ok(Self::Code),
            "tables" | "table" => Ok(Self::Tables),
            "lists" | "list" => Ok(Self::Lists),
            "meta" => Ok(Self::Meta),
            other => Err(format!("unknown content kind: {other}")),
        }
    }
}

impl SpecificKind {
    /// Parse configured kind names, skipping (and logging) unknown ones.
    pub fn parse_list<S: AsRef<str>>(names: &[S]) -> Vec<Self> {
        let mut kinds = Vec::new();
        for name in names {
            match name.as_ref().parse::<Self>() {
                Ok(kind) if !kinds.contains(&kind) => kinds.push(kind),
                Ok(_) => {}
                Err(e) => tracing::warn!("{e}"),
            }
        }
        kinds
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Image {
    pub src: String,
    pub alt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Media {
    pub src: String,
    /// Tag or MIME type, e.g. `video`, `video/mp4`, `iframe`.
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub text: String,
    pub cite: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Heading {
    pub level: u8,
    pub text: String,
    pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeBlock {
    pub language: Option<String>,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListBlock {
    pub ordered: bool,
    pub items: Vec<String>,
}

/// Elements extracted for the requested kinds. Unrequested kinds stay empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SpecificContent {
    pub images: Vec<Image>,
    pub links: Vec<super::Link>,
    pub videos: Vec<Media>,
    pub audios: Vec<Media>,
    pub quotes: Vec<Quote>,
    pub headings: Vec<Heading>,
    pub code_blocks: Vec<CodeBlock>,
    pub tables: Vec<Table>,
    pub lists: Vec<ListBlock>,
    pub meta: BTreeMap<String, String>,
}

fn sel(css: &'static str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(selector) => Some(selector),
        Err(e) => {
            tracing::warn!(css, error = %e, "Invalid selector");
            None
        }
    }
}

fn text_of(element: &ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

fn resolve(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with("data:") || href.starts_with("javascript:") {
        return None;
    }
    base.join(href).ok().map(String::from)
}

fn images(document: &Html, base: &Url) -> Vec<Image> {
    let Some(selector) = sel("img[src]") else { return Vec::new() };
    let mut seen = HashSet::new();
    document
        .select(&selector)
        .filter_map(|el| {
            let src = resolve(base, el.value().attr("src")?)?;
            let alt = el.value().attr("alt").map(collapse_whitespace).filter(|a| !a.is_empty());
            seen.insert(src.clone()).then_some(Image { src, alt })
        })
        .collect()
}

/// Embed hosts whose iframes count as videos.
const VIDEO_HOSTS: &[&str] = &["youtube.com", "youtu.be", "vimeo.com", "bilibili.com"];

fn media(
    document: &Html,
    base: &Url,
    tag: &'static str,
    sources: &'static str,
    embeds: &[&str],
) -> Vec<Media> {
    let mut seen = HashSet::new();
    let mut found = Vec::new();

    if let Some(selector) = sel(tag) {
        for el in document.select(&selector) {
            if let Some(src) = el.value().attr("src").and_then(|s| resolve(base, s))
                && seen.insert(src.clone())
            {
                found.push(Media { src, kind: tag.to_string() });
            }
        }
    }

    if let Some(selector) = sel(sources) {
        for el in document.select(&selector) {
            if let Some(src) = el.value().attr("src").and_then(|s| resolve(base, s))
                && seen.insert(src.clone())
            {
                let kind = el.value().attr("type").unwrap_or(tag).to_string();
                found.push(Media { src, kind });
            }
        }
    }

    if !embeds.is_empty()
        && let Some(selector) = sel("iframe[src]")
    {
        for el in document.select(&selector) {
            if let Some(src) = el.value().attr("src").and_then(|s| resolve(base, s))
                && embeds.iter().any(|host| src.contains(host))
                && seen.insert(src.clone())
            {
                found.push(Media { src, kind: "iframe".into() });
            }
        }
    }

    found
}

fn quotes(document: &Html) -> Vec<Quote> {
    let Some(selector) = sel("blockquote, q") else { return Vec::new() };
    document
        .select(&selector)
        .filter_map(|el| {
            let text = text_of(&el);
            let cite = el.value().attr("cite").map(str::to_string);
            (!text.is_empty()).then_some(Quote { text, cite })
        })
        .collect()
}

fn headings(document: &Html) -> Vec<Heading> {
    let Some(selector) = sel("h1, h2, h3, h4, h5, h6") else { return Vec::new() };
    document
        .select(&selector)
        .filter_map(|el| {
            let level = el.value().name().strip_prefix('h')?.parse().ok()?;
            let text = text_of(&el);
            let id = el.value().attr("id").map(str::to_string);
            (!text.is_empty()).then_some(Heading { level, text, id })
        })
        .collect()
}

fn code_blocks(document: &Html) -> Vec<CodeBlock> {
    let Some(selector) = sel("pre") else { return Vec::new() };
    let code_sel = sel("code");
    document
        .select(&selector)
        .filter_map(|pre| {
            let code_el = code_sel.as_ref().and_then(|s| pre.select(s).next());
            let classes =
                code_el.iter().flat_map(|c| c.value().classes()).chain(pre.value().classes());
            let language = classes
                .filter_map(|class| {
                    class.strip_prefix("language-").or_else(|| class.strip_prefix("lang-"))
                })
                .map(str::to_string)
                .next();
            let code = pre.text().collect::<String>().trim_matches('\n').to_string();
            (!code.trim().is_empty()).then_some(CodeBlock { language, code })
        })
        .collect()
}

fn tables(document: &Html) -> Vec<Table> {
    let (Some(table_sel), Some(row_sel), Some(cell_sel)) = (sel("table"), sel("tr"), sel("th, td"))
    else {
        return Vec::new();
    };
    document
        .select(&table_sel)
        .filter_map(|table| {
            let mut parsed = Table::default();
            for row in table.select(&row_sel) {
                let is_header = row.select(&cell_sel).all(|cell| cell.value().name() == "th");
                let cells: Vec<String> = row.select(&cell_sel).map(|cell| text_of(&cell)).collect();
                if cells.is_empty() {
                    continue;
                }
                if is_header && parsed.headers.is_empty() && parsed.rows.is_empty() {
                    parsed.headers = cells;
                } else {
                    parsed.rows.push(cells);
                }
            }
            (!parsed.headers.is_empty() || !parsed.rows.is_empty()).then_some(parsed)
        })
        .collect()
}

fn lists(document: &Html) -> Vec<ListBlock> {
    let Some(selector) = sel("ul, ol") else { return Vec::new() };
    document
        .select(&selector)
        .filter_map(|list| {
            let items: Vec<String> = list
                .children()
                .filter_map(ElementRef::wrap)
                .filter(|child| child.value().name() == "li")
                .map(|li| text_of(&li))
                .filter(|text| !text.is_empty())
                .collect();
            (!items.is_empty()).then(|| ListBlock { ordered: list.value().name() == "ol", items })
        })
        .collect()
}

fn meta(document: &Html) -> BTreeMap<String, String> {
    let Some(selector) = sel("meta[content]") else { return BTreeMap::new() };
    document
        .select(&selector)
        .filter_map(|el| {
            let key = el.value().attr("name").or_else(|| el.value().attr("property"))?;
            let value = el.value().attr("content")?.trim();
            (!key.is_empty() && !value.is_empty())
                .then(|| (key.to_ascii_lowercase(), value.to_string()))
        })
        .collect()
}

/// Pull the requested element kinds out of `html`, resolving URLs against `base`.
pub fn extract_specific(html: &str, base: &Url, kinds: &[SpecificKind]) -> SpecificContent {
    let document = Html::parse_document(html);
    let mut content = SpecificContent::default();

    for kind in kinds {
        match kind {
            SpecificKind::Images => content.images = images(&document, base),
            SpecificKind::Links => content.links = super::extract_links(html, base),
            SpecificKind::Videos => {
                content.videos = media(&document, base, "video", "video source[src]", VIDEO_HOSTS)
            }
            SpecificKind::Audios => {
                content.audios = media(&document, base, "audio", "audio source[src]", &[])
            }
            SpecificKind::Quotes => content.quotes = quotes(&document),
            SpecificKind::Headings => content.headings = headings(&document),
            SpecificKind::Code => content.code_blocks = code_blocks(&document),
            SpecificKind::Tables => content.tables = tables(&document),
            SpecificKind::Lists => content.lists = lists(&document),
            SpecificKind::Meta => content.meta = meta(&document),
        }
    }

    content
}

impl SpecificContent {
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
            && self.links.is_empty()
            && self.videos.is_empty()
            && self.audios.is_empty()
            && self.quotes.is_empty()
            && self.headings.is_empty()
            && self.code_blocks.is_empty()
            && self.tables.is_empty()
            && self.lists.is_empty()
            && self.meta.is_empty()
    }

    /// Compact Markdown appendix. Long sections are capped.
    pub fn to_markdown(&self) -> String {
        if self.is_empty() {
            return String::new();
        }

        let mut out = String::from("\n\n**Extracted content**\n");

        if !self.images.is_empty() {
            let _ = writeln!(out, "\nImages ({}):", self.images.len());
            for image in &self.images {
                match &image.alt {
                    Some(alt) => _ = writeln!(out, "- {} (alt: {alt})", image.src),
                    None => _ = writeln!(out, "- {}", image.src),
                }
            }
        }

        if !self.links.is_empty() {
            let _ = writeln!(out, "\nLinks ({}):", self.links.len());
            for link in self.links.iter().take(5) {
                let _ = writeln!(out, "- [{}]({})", link.text, link.href);
            }
        }

        for (label, items) in [("Videos", &self.videos), ("Audio", &self.audios)] {
            if !items.is_empty() {
                let _ = writeln!(out, "\n{label} ({}):", items.len());
                for item in items {
                    let _ = writeln!(out, "- {} ({})", item.src, item.kind);
                }
            }
        }

        if !self.quotes.is_empty() {
            let _ = writeln!(out, "\nQuotes ({}):", self.quotes.len());
            for quote in self.quotes.iter().take(3) {
                match &quote.cite {
                    Some(cite) => _ = writeln!(out, "> {} ({cite})\n", quote.text),
                    None => _ = writeln!(out, "> {}\n", quote.text),
                }
            }
        }

        if !self.headings.is_empty() {
            let _ = writeln!(out, "\nHeadings ({}):", self.headings.len());
            for heading in &self.headings {
                let indent = "  ".repeat(usize::from(heading.level.saturating_sub(1)));
                let _ = writeln!(out, "{indent}- h{} {}", heading.level, heading.text);
            }
        }

        if !self.code_blocks.is_empty() {
            let _ = writeln!(out, "\nCode blocks ({}):", self.code_blocks.len());
            for block in self.code_blocks.iter().take(2) {
                let language = block.language.as_deref().unwrap_or_default();
                let _ = writeln!(out, "```{language}\n{}\n```", block.code);
            }
        }

        if !self.tables.is_empty() {
            let _ = writeln!(out, "\nTables ({}):", self.tables.len());
            for table in self.tables.iter().take(2) {
                out.push('\n');
                if !table.headers.is_empty() {
                    let _ = writeln!(out, "| {} |", table.headers.join(" | "));
                    let _ = writeln!(out, "|{}", " --- |".repeat(table.headers.len()));
                }
                for row in &table.rows {
                    let _ = writeln!(out, "| {} |", row.join(" | "));
                }
            }
        }

        if !self.lists.is_empty() {
            let _ = writeln!(out, "\nLists ({}):", self.lists.len());
            for list in self.lists.iter().take(2) {
                out.push('\n');
                for (i, item) in list.items.iter().enumerate() {
                    if list.ordered {
                        let _ = writeln!(out, "{}. {item}", i + 1);
                    } else {
                        let _ = writeln!(out, "- {item}");
                    }
                }
            }
        }

        if !self.meta.is_empty() {
            out.push_str("\nMeta:\n");
            for (key, value) in &self.meta {
                let _ = writeln!(out, "- {key}: {value}");
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html>
        <head>
            <meta name="description" content="Page description">
            <meta property="og:type" content="article">
        </head>
        <body>
            <h1 id="top">Title</h1>
            <h2>Section</h2>
            <img src="/a.png" alt="First image">
            <img src="/a.png">
            <img src="data:image/png;base64,AAAA">
            <video src="/clip.mp4"></video>
            <iframe src="https://www.youtube.com/embed/xyz"></iframe>
            <iframe src="https://ads.test/frame"></iframe>
            <audio><source src="/song.mp3" type="audio/mpeg"></audio>
            <blockquote cite="https://source.test">Quoted   words</blockquote>
            <pre><code class="language-rust">fn main() {}</code></pre>
            <table>
                <tr><th>Name</th><th>Value</th></tr>
                <tr><td>a</td><td>1</td></tr>
            </table>
            <ol><li>one</li><li>two</li></ol>
            <a href="/one">One</a><a href="/two">Two</a>
        </body>
        </html>
    "#;

    const ALL: &[SpecificKind] = &[
        SpecificKind::Images,
        SpecificKind::Links,
        SpecificKind::Videos,
        SpecificKind::Audios,
        SpecificKind::Quotes,
        SpecificKind::Headings,
        SpecificKind::Code,
        SpecificKind::Tables,
        SpecificKind::Lists,
        SpecificKind::Meta,
    ];

    fn base() -> Url {
        Url::parse("https://example.com/dir/").unwrap()
    }

    #[test]
    fn test_parse_kinds() {
        let kinds = SpecificKind::parse_list(&["Images", "code_blocks", "bogus", "images"]);
        assert_eq!(kinds, vec![SpecificKind::Images, SpecificKind::Code]);
    }

    #[test]
    fn test_only_requested_kinds() {
        let content = extract_specific(PAGE, &base(), &[SpecificKind::Headings]);
        assert_eq!(content.headings.len(), 2);
        assert!(content.images.is_empty());
        assert!(content.meta.is_empty());
    }

    #[test]
    fn test_extract_all_kinds() {
        let content = extract_specific(PAGE, &base(), ALL);

        let image =
            Image { src: "https://example.com/a.png".into(), alt: Some("First image".into()) };
        assert_eq!(content.images, vec![image]);
        assert_eq!(content.links.len(), 2);
        assert_eq!(content.videos.len(), 2);
        assert_eq!(content.videos[0].src, "https://example.com/clip.mp4");
        assert_eq!(content.videos[1].kind, "iframe");
        let audio = Media { src: "https://example.com/song.mp3".into(), kind: "audio/mpeg".into() };
        assert_eq!(content.audios, vec![audio]);
        assert_eq!(content.quotes[0].text, "Quoted words");
        assert_eq!(content.quotes[0].cite.as_deref(), Some("https://source.test"));
        let heading = Heading { level: 1, text: "Title".into(), id: Some("top".into()) };
        assert_eq!(content.headings[0], heading);
        assert_eq!(content.code_blocks[0].language.as_deref(), Some("rust"));
        assert_eq!(content.code_blocks[0].code, "fn main() {}");
        assert_eq!(content.tables[0].headers, vec!["Name", "Value"]);
        assert_eq!(content.tables[0].rows, vec![vec!["a".to_string(), "1".to_string()]]);
        let list = ListBlock { ordered: true, items: vec!["one".into(), "two".into()] };
        assert_eq!(content.lists[0], list);
        assert_eq!(content.meta.get("description").map(String::as_str), Some("Page description"));
        assert_eq!(content.meta.get("og:type").map(String::as_str), Some("article"));
    }

    #[test]
    fn test_markdown_appendix() {
        let content = extract_specific(PAGE, &base(), ALL);
        let md = content.to_markdown();
        assert!(md.contains("**Extracted content**"));
        assert!(md.contains("- https://example.com/a.png (alt: First image)"));
        assert!(md.contains("| Name | Value |"));
        assert!(md.contains("```rust\nfn main() {}\n```"));
        assert!(md.contains("1. one"));
    }

    #[test]
    fn test_markdown_caps_links() {
        let html: String = (0..10).map(|i| format!(r#"<a href="/p{i}">P{i}</a>"#)).collect();
        let content = extract_specific(&html, &base(), &[SpecificKind::Links]);
        let md = content.to_markdown();
        assert!(md.contains("Links (10):"));
        assert_eq!(md.matches("- [P").count(), 5);
    }

    #[test]
    fn test_empty_content_renders_nothing() {
        assert_eq!(SpecificContent::default().to_markdown(), "");
    }
}
