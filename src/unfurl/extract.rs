//! Metadata extraction - Open Graph, Twitter Card and plain HTML fallbacks.
//!
//! Purely textual: no DOM is built and no script runs. Input size is already
//! bounded by the fetcher.

use regex::Regex;
use std::sync::LazyLock;
use url::Url;

static META_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<meta\b[^>]*>").unwrap());

static LINK_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<link\b[^>]*>").unwrap());

static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap()
});

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title\b[^>]*>(.*?)</title>").unwrap());

const ICON_RELS: &[&str] = &["icon", "shortcut icon", "apple-touch-icon"];

const DEFAULT_FAVICON: &str = "/favicon.ico";

/// Preview fields extracted from a page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
}

/// Extract preview metadata, resolving the image against `base`.
pub fn extract_metadata(html: &str, base: &Url) -> Metadata {
    let metas = scan_meta_tags(html);
    let meta = |key: &str| {
        metas
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v)
            .find(|v| !v.is_empty())
            .cloned()
    };

    let title = meta("og:title")
        .or_else(|| meta("twitter:title"))
        .or_else(|| extract_html_title(html));

    let description = meta("og:description")
        .or_else(|| meta("twitter:description"))
        .or_else(|| meta("description"));

    let image = meta("og:image")
        .or_else(|| meta("twitter:image"))
        .or_else(|| extract_icon_href(html))
        .unwrap_or_else(|| DEFAULT_FAVICON.to_string());

    Metadata {
        title,
        description,
        image: absolutize(base, &image),
    }
}

/// Collect `(key, content)` for every `<meta>` carrying `property` or `name`
/// plus `content`, in document order. Keys are lower-cased.
fn scan_meta_tags(html: &str) -> Vec<(String, String)> {
    META_TAG_RE
        .find_iter(html)
        .filter_map(|tag| {
            let mut key = None;
            let mut content = None;
            for (name, value) in attributes(tag.as_str()) {
                match name.as_str() {
                    "property" | "name" if key.is_none() => key = Some(value.to_lowercase()),
                    "content" => content = Some(html_decode(value.trim())),
                    _ => {}
                }
            }
            Some((key?, content?))
        })
        .collect()
}

/// First favicon-family `<link>` href, in document order.
fn extract_icon_href(html: &str) -> Option<String> {
    LINK_TAG_RE.find_iter(html).find_map(|tag| {
        let mut rel = None;
        let mut href = None;
        for (name, value) in attributes(tag.as_str()) {
            match name.as_str() {
                "rel" => rel = Some(value.trim().to_lowercase()),
                "href" => href = Some(html_decode(value.trim())),
                _ => {}
            }
        }
        let rel = rel?;
        let href = href.filter(|h| !h.is_empty())?;
        ICON_RELS.contains(&rel.as_str()).then_some(href)
    })
}

/// Attribute `(name, value)` pairs of a single tag; names are lower-cased.
fn attributes(tag: &str) -> impl Iterator<Item = (String, &str)> + '_ {
    ATTR_RE.captures_iter(tag).filter_map(|caps| {
        let name = caps.get(1)?.as_str().to_ascii_lowercase();
        let value = caps.get(2).or_else(|| caps.get(3))?.as_str();
        Some((name, value))
    })
}

/// Extract HTML <title> tag
fn extract_html_title(html: &str) -> Option<String> {
    let caps = TITLE_RE.captures(html)?;
    let title = html_decode(caps.get(1)?.as_str().trim());
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

fn absolutize(base: &Url, maybe_relative: &str) -> Option<String> {
    base.join(maybe_relative).ok().map(|u| u.to_string())
}

/// Basic HTML entity decoding
fn html_decode(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
