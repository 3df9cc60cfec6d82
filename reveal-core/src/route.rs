//! Route normalization shared by the backtrack detector and event enrichment.
//!
//! A route key is the URL's pathname only: query and hash are dropped, and a
//! trailing slash is removed except for the root `/`.

use std::sync::LazyLock;

use regex::Regex;
use reqwest::Url;

/// Manual `scheme://host(/path)` extraction for URLs the parser rejects.
static URL_FALLBACK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://[^/?#\s]*(/[^?#]*)?")
        .expect("URL_FALLBACK_RE regex should compile")
});

/// Pathname of `url`, or `/` when nothing usable can be extracted.
pub fn pathname(url: &str) -> String {
    let trimmed = url.trim();
    if let Ok(parsed) = Url::parse(trimmed) {
        if !parsed.cannot_be_a_base() {
            return parsed.path().to_string();
        }
    }
    if let Some(path) = URL_FALLBACK_RE
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
    {
        return path;
    }
    if trimmed.starts_with('/') {
        let end = trimmed.find(['?', '#']).unwrap_or(trimmed.len());
        return trimmed[..end].to_string();
    }
    "/".to_string()
}

/// Normalized route key for `url`.
pub fn normalize_route(url: &str) -> String {
    let path = pathname(url);
    let stripped = path.trim_end_matches('/');
    if stripped.is_empty() {
        "/".to_string()
    } else {
        stripped.to_string()
    }
}
