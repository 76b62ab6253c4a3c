//! Cache key derivation.
//!
//! A key is the request path plus its query string exactly as received.
//! Parameter order is not normalized, so `?a=1&b=2` and `?b=2&a=1` are
//! distinct entries.

use std::borrow::Borrow;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

/// Base used to resolve relative request targets such as `/posts?page=2`.
const KEY_BASE: &str = "http://localhost/";

/// Normalized identifier of one cached page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a URL or request target.
    ///
    /// Input that cannot be parsed is used verbatim.
    pub fn from_url(raw: &str) -> Self {
        match parse_target(raw) {
            Some(url) => {
                let mut key = url.path().to_string();
                if let Some(query) = url.query().filter(|query| !query.is_empty()) {
                    key.push('?');
                    key.push_str(query);
                }
                Self(key)
            }
            None => Self(raw.to_string()),
        }
    }

    /// Wrap a string that is already a derived key.
    pub(crate) fn from_canonical(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn parse_target(raw: &str) -> Option<Url> {
    let base = Url::parse(KEY_BASE).ok()?;
    base.join(raw).ok()
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Shorthand for [`CacheKey::from_url`].
pub fn cache_key(url: &str) -> CacheKey {
    CacheKey::from_url(url)
}

/// Selects cache keys for bulk invalidation.
#[derive(Debug, Clone)]
pub enum Pattern {
    Exact(String),
    Prefix(String),
    Regex(Regex),
}

impl Pattern {
    /// Compile a regular expression pattern.
    pub fn regex(source: &str) -> Result<Self, regex::Error> {
        Regex::new(source).map(Self::Regex)
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::Exact(expected) => key == expected,
            Self::Prefix(prefix) => key.starts_with(prefix.as_str()),
            Self::Regex(regex) => regex.is_match(key),
        }
    }
}

impl From<Regex> for Pattern {
    fn from(regex: Regex) -> Self {
        Self::Regex(regex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_and_query_are_kept_verbatim() {
        assert_eq!(cache_key("/posts?page=2").as_str(), "/posts?page=2");
        assert_eq!(
            cache_key("https://example.com/blog/hello?b=2&a=1").as_str(),
            "/blog/hello?b=2&a=1"
        );
    }

    #[test]
    fn query_order_is_not_normalized() {
        assert_ne!(cache_key("/a?x=1&y=2"), cache_key("/a?y=2&x=1"));
    }

    #[test]
    fn trailing_slash_is_significant() {
        assert_ne!(cache_key("/blog"), cache_key("/blog/"));
    }

    #[test]
    fn fragment_and_empty_query_are_dropped() {
        assert_eq!(cache_key("/a?#top").as_str(), "/a");
        assert_eq!(cache_key("/a#top").as_str(), "/a");
    }

    #[test]
    fn malformed_input_falls_back_to_raw_string() {
        let raw = "http://[::1";
        assert_eq!(cache_key(raw).as_str(), raw);
    }

    #[test]
    fn patterns_match_keys() {
        assert!(Pattern::Prefix("/blog/".into()).matches("/blog/hello"));
        assert!(!Pattern::Prefix("/blog/".into()).matches("/about"));
        assert!(Pattern::Exact("/about".into()).matches("/about"));
        let regex = Pattern::regex(r"^/blog/\d+$").expect("valid regex");
        assert!(regex.matches("/blog/42"));
        assert!(!regex.matches("/blog/latest"));
        assert!(Pattern::regex("(").is_err());
    }
}
