//! URL canonicalization for consistent caching, plus URL detection in chat text.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

/// Error type for URL canonicalization failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Query parameters that only carry tracking state.
const TRACKING_PARAMS: &[&str] = &[
    "utm", "fbclid", "gclid", "dclid", "msclkid", "mc_cid", "mc_eid", "igshid", "yclid", "spm",
    "ref_src", "_hsenc", "_hsmkt",
];

/// Characters that end a URL in running text (whitespace, quotes, CJK text and punctuation).
const URL_BODY: &str = r#"[^\s<>"'`\p{Han}\p{Hiragana}\p{Katakana}，。！？；：、（）【】「」『』《》]"#;

static SCHEME_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?i)https?://{URL_BODY}+")).expect("static regex"));

static BARE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)(?:https?://)?(?:[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\.)+[a-z]{{2,}}(?::\d{{1,5}})?(?:/{URL_BODY}*)?"
    ))
    .expect("static regex")
});

fn is_tracking_param(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name.starts_with("utm_") || TRACKING_PARAMS.contains(&name.as_str())
}

/// Canonicalize a URL string for consistent caching and safety checks.
///
/// Normalization steps:
/// 1. Trim leading/trailing whitespace
/// 2. Default scheme to https:// if missing
/// 3. Lowercase scheme and host, drop default ports
/// 4. Remove fragment (#...)
/// 5. Remove tracking query parameters, keep the rest in order
/// 6. Drop an empty query
pub fn canonicalize(input: &str) -> Result<url::Url, UrlError> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let url_str = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let mut parsed = url::Url::parse(&url_str).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlError::UnsupportedScheme(scheme.to_string())),
    }

    match parsed.host_str() {
        None | Some("") => return Err(UrlError::InvalidUrl("missing host".into())),
        Some(host) => {
            let host = host.to_lowercase();
            parsed.set_host(Some(&host)).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
        }
    }

    parsed.set_fragment(None);

    if let Some(query) = parsed.query() {
        let kept: Vec<&str> = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .filter(|pair| !is_tracking_param(pair.split('=').next().unwrap_or_default()))
            .collect();
        let rebuilt = kept.join("&");
        if rebuilt.is_empty() {
            parsed.set_query(None);
        } else if rebuilt != query {
            parsed.set_query(Some(&rebuilt));
        }
    }

    Ok(parsed)
}

/// Normalized string form of a URL; see [`canonicalize`].
///
/// Idempotent: normalizing an already-normalized URL returns it unchanged.
pub fn normalize(input: &str) -> Result<String, UrlError> {
    canonicalize(input).map(String::from)
}

/// Whether `input` is an absolute http(s) URL with a well-formed authority.
pub fn is_valid(input: &str) -> bool {
    let Ok(url) = url::Url::parse(input.trim()) else {
        return false;
    };
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }
    match url.host() {
        Some(url::Host::Domain(domain)) => {
            !domain.is_empty() && domain.split('.').all(|label| !label.is_empty())
        }
        Some(url::Host::Ipv4(_) | url::Host::Ipv6(_)) => true,
        None => false,
    }
}

fn trim_trailing(candidate: &str) -> &str {
    let mut end = candidate;
    loop {
        let Some(last) = end.chars().last() else { return end };
        let strip = match last {
            ')' => end.matches('(').count() < end.matches(')').count(),
            ']' => end.matches('[').count() < end.matches(']').count(),
            '.' | ',' | ';' | ':' | '!' | '?' | '}' | '>' | '\'' | '"' => true,
            _ => false,
        };
        if !strip {
            return end;
        }
        end = &end[..end.len() - last.len_utf8()];
    }
}

/// Find URLs in free text, in first-seen order.
///
/// With `allow_protocolless`, bare `domain.tld/path` tokens are accepted and
/// prefixed with `<default_protocol>://`. Email addresses are skipped.
pub fn extract_urls(text: &str, allow_protocolless: bool, default_protocol: &str) -> Vec<String> {
    let pattern: &Regex = if allow_protocolless { &BARE_URL } else { &SCHEME_URL };
    let mut found = Vec::new();

    for m in pattern.find_iter(text) {
        let candidate = trim_trailing(m.as_str());
        if candidate.is_empty() {
            continue;
        }

        let has_scheme = candidate.get(..7).is_some_and(|p| p.eq_ignore_ascii_case("http://"))
            || candidate.get(..8).is_some_and(|p| p.eq_ignore_ascii_case("https://"));

        // Bare tokens glued to an email address or a longer word are not links.
        let preceding = text[..m.start()].chars().last();
        if !has_scheme
            && (matches!(preceding, Some('@' | '.' | '/' | '-' | '_'))
                || preceding.is_some_and(|c| c.is_ascii_alphanumeric()))
        {
            continue;
        }
        let url = if has_scheme {
            candidate.to_string()
        } else {
            format!("{default_protocol}://{candidate}")
        };

        if !found.contains(&url) {
            found.push(url);
        }
    }

    found
}

/// Normalize, validate, and deduplicate URLs, keeping first-seen order.
pub fn dedup_normalized<I, S>(urls: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for raw in urls {
        match normalize(raw.as_ref()) {
            Ok(url) if is_valid(&url) => {
                if seen.insert(url.clone()) {
                    out.push(url);
                }
            }
            Ok(url) => tracing::debug!(%url, "Dropping invalid URL"),
            Err(e) => tracing::debug!(raw = raw.as_ref(), error = %e, "Dropping unparsable URL"),
        }
    }

    out
}
