//! Domain allow/deny policy.
//!
//! A non-empty allowlist wins: only listed domains (and their subdomains)
//! pass. Otherwise the denylist rejects listed domains and their subdomains.

use linkscope_core::config::AppConfig;
use url::Url;

#[derive(Debug, Clone, Default)]
pub struct DomainPolicy {
    allow: Vec<String>,
    deny: Vec<String>,
}

fn clean(entries: &[String]) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            let entry = entry.trim().to_ascii_lowercase();
            let entry = entry.split_once("://").map_or(entry.as_str(), |(_, rest)| rest);
            let entry = entry.split('/').next().unwrap_or_default();
            entry.trim_start_matches("*.").trim_start_matches('.').trim_end_matches('.').to_string()
        })
        .filter(|entry| !entry.is_empty())
        .collect()
}

fn matches(host: &str, domain: &str) -> bool {
    host == domain || host.strip_suffix(domain).is_some_and(|prefix| prefix.ends_with('.'))
}

impl DomainPolicy {
    pub fn new(allow: &[String], deny: &[String]) -> Self {
        Self { allow: clean(allow), deny: clean(deny) }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.allowlist_domains, &config.denylist_domains)
    }

    /// Whether `url` may be analyzed. URLs without a host are rejected.
    pub fn is_allowed(&self, url: &str) -> bool {
        let Some(host) = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.trim_end_matches('.').to_ascii_lowercase()))
        else {
            return false;
        };

        if !self.allow.is_empty() {
            return self.allow.iter().any(|domain| matches(&host, domain));
        }
        !self.deny.iter().any(|domain| matches(&host, domain))
    }

    pub fn is_unrestricted(&self) -> bool {
        self.allow.is_empty() && self.deny.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_policy_allows_all() {
        let policy = DomainPolicy::default();
        assert!(policy.is_unrestricted());
        assert!(policy.is_allowed("https://anything.test/"));
    }

    #[test]
    fn test_denylist_blocks_subdomains() {
        let policy = DomainPolicy::new(&[], &list(&["evil.test"]));
        assert!(!policy.is_allowed("https://evil.test/"));
        assert!(!policy.is_allowed("https://cdn.evil.test/x"));
        assert!(policy.is_allowed("https://notevil.test/"));
        assert!(policy.is_allowed("https://example.com/"));
    }

    #[test]
    fn test_allowlist_takes_precedence() {
        let policy =
            DomainPolicy::new(&list(&["example.com"]), &list(&["example.com", "other.test"]));
        assert!(policy.is_allowed("https://example.com/"));
        assert!(policy.is_allowed("https://docs.example.com/"));
        assert!(!policy.is_allowed("https://other.test/"));
        assert!(!policy.is_allowed("https://unlisted.test/"));
    }

    #[test]
    fn test_entries_are_cleaned() {
        let denylist = list(&["  HTTPS://Evil.Test/path ", "*.ads.test", ""]);
        let policy = DomainPolicy::new(&[], &denylist);
        assert!(!policy.is_allowed("https://evil.test/"));
        assert!(!policy.is_allowed("https://x.ads.test/"));
        assert!(policy.is_allowed("https://good.test/"));
    }

    #[test]
    fn test_unparsable_url_rejected() {
        assert!(!DomainPolicy::default().is_allowed("not a url"));
    }
}
