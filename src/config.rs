//! Runtime configuration injected into the safety gate and fetcher.

use std::time::Duration;
use tracing::warn;
use url::Host;

/// Maximum response size to fetch (1MB)
pub const DEFAULT_MAX_BODY_BYTES: u64 = 1024 * 1024;

/// Deadline for one whole unfurl: DNS, HEAD, GET and body across redirects
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_MAX_REDIRECTS: usize = 10;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (compatible; LinkPreviewBot/1.0; +https://example.com/bot)";

/// A single hostname pattern: `host.example` or `*.example`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostPattern {
    Exact(String),
    /// Matches any strict subdomain of the suffix.
    Wildcard(String),
}

impl HostPattern {
    /// Parse a pattern, returning `None` for blank or invalid entries.
    ///
    /// Internationalized names are converted to their ASCII (punycode) form,
    /// which is what parsed request URLs carry.
    pub fn parse(raw: &str) -> Option<Self> {
        let pattern = raw.trim().trim_end_matches('.');
        if let Some(suffix) = pattern.strip_prefix("*.") {
            return ascii_host(suffix.trim_start_matches('.')).map(Self::Wildcard);
        }
        if pattern == "*" {
            return None;
        }
        ascii_host(pattern).map(Self::Exact)
    }

    /// `host` must already be normalized.
    fn matches(&self, host: &str) -> bool {
        match self {
            Self::Exact(exact) => host == exact,
            Self::Wildcard(suffix) => host
                .strip_suffix(suffix.as_str())
                .is_some_and(|label| label.len() > 1 && label.ends_with('.')),
        }
    }
}

/// Ordered set of host patterns, immutable once built.
#[derive(Debug, Clone, Default)]
pub struct HostList {
    patterns: Vec<HostPattern>,
}

impl HostList {
    pub fn from_patterns<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .filter_map(|p| HostPattern::parse(p.as_ref()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Case-insensitive match, ignoring a trailing root dot on `host`.
    pub fn matches(&self, host: &str) -> bool {
        let host = normalize_host(host);
        self.patterns.iter().any(|p| p.matches(&host))
    }
}

fn ascii_host(raw: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    match Host::parse(raw) {
        Ok(Host::Domain(domain)) => Some(domain),
        Ok(Host::Ipv4(ip)) => Some(ip.to_string()),
        Ok(Host::Ipv6(ip)) => Some(ip.to_string()),
        Err(e) => {
            warn!("Ignoring invalid host pattern {:?}: {}", raw, e);
            None
        }
    }
}

fn normalize_host(raw: &str) -> String {
    raw.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Configuration for the unfurl pipeline.
#[derive(Debug, Clone)]
pub struct UnfurlConfig {
    pub allow_hosts: HostList,
    pub deny_hosts: HostList,
    pub timeout: Duration,
    pub max_body_bytes: u64,
    pub max_redirects: usize,
    /// Skip address classification entirely. Local development only.
    pub allow_private_addresses: bool,
    pub user_agent: String,
}

impl Default for UnfurlConfig {
    fn default() -> Self {
        Self {
            allow_hosts: HostList::default(),
            deny_hosts: HostList::default(),
            timeout: DEFAULT_TIMEOUT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            allow_private_addresses: false,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_patterns() {
        assert_eq!(
            HostPattern::parse(" Example.COM. "),
            Some(HostPattern::Exact("example.com".to_string()))
        );
        assert_eq!(
            HostPattern::parse("*.example.com"),
            Some(HostPattern::Wildcard("example.com".to_string()))
        );
        assert_eq!(HostPattern::parse(""), None);
        assert_eq!(HostPattern::parse("*"), None);
        assert_eq!(HostPattern::parse("*."), None);
    }

    #[test]
    fn test_exact_match_is_case_insensitive() {
        let list = HostList::from_patterns(["evil.example"]);
        assert!(list.matches("evil.example"));
        assert!(list.matches("EVIL.example"));
        assert!(list.matches("evil.example."));
        assert!(!list.matches("notevil.example"));
        assert!(!list.matches("sub.evil.example"));
    }

    #[test]
    fn test_wildcard_matches_subdomains_only() {
        let list = HostList::from_patterns(["*.example.com"]);
        assert!(list.matches("sub.example.com"));
        assert!(list.matches("a.b.example.com"));
        assert!(!list.matches("example.com"));
        assert!(!list.matches("badexample.com"));
        assert!(!list.matches("other.org"));
    }

    #[test]
    fn test_unicode_patterns_match_punycode_hosts() {
        let list = HostList::from_patterns(["bücher.example", "*.MÜNCHEN.example"]);
        assert!(list.matches("xn--bcher-kva.example"));
        assert!(list.matches("shop.xn--mnchen-3ya.example"));
        assert!(!list.matches("xn--mnchen-3ya.example"));

        let host = url::Url::parse("http://BÜCHER.example/").unwrap();
        assert!(list.matches(host.host_str().unwrap()));
    }

    #[test]
    fn test_ip_patterns_use_canonical_form() {
        let list = HostList::from_patterns(["0x7f.0.0.1", "[::1]"]);
        assert!(list.matches("127.0.0.1"));
        assert!(list.matches("::1"));
    }

    #[test]
    fn test_blank_entries_are_ignored() {
        let list = HostList::from_patterns(["", "  ", "a.example"]);
        assert_eq!(list.len(), 1);
        assert!(HostList::from_patterns([""]).is_empty());
    }
}
