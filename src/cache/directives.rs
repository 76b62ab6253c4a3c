//! Revalidation directives.
//!
//! Pages describe their own freshness with a comma-separated directive
//! string: a bare integer sets the revalidate window in seconds and
//! `stale-while-revalidate=N` sets the stale window. Downstream HTTP caches
//! receive the resolved windows as a `Cache-Control` header.

use super::config::{CacheConfig, PageConfig};

const STALE_WHILE_REVALIDATE: &str = "stale-while-revalidate=";

/// Directives parsed from a revalidation header; absent values are `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RevalidateDirectives {
    pub revalidate: Option<u64>,
    pub stale_while_revalidate: Option<u64>,
}

impl RevalidateDirectives {
    /// Parse a directive string. Unrecognized tokens are ignored.
    pub fn parse(value: &str) -> Self {
        let mut directives = Self::default();
        for token in value.split(',').map(str::trim) {
            if let Ok(seconds) = token.parse::<u64>() {
                directives.revalidate = Some(seconds);
                continue;
            }
            let Some(prefix) = token.get(..STALE_WHILE_REVALIDATE.len()) else {
                continue;
            };
            if prefix.eq_ignore_ascii_case(STALE_WHILE_REVALIDATE)
                && let Ok(seconds) = token[STALE_WHILE_REVALIDATE.len()..].trim().parse::<u64>()
            {
                directives.stale_while_revalidate = Some(seconds);
            }
        }
        directives
    }

    pub fn is_empty(&self) -> bool {
        self.revalidate.is_none() && self.stale_while_revalidate.is_none()
    }

    pub fn into_page_config(self) -> PageConfig {
        PageConfig {
            revalidate: self.revalidate,
            stale_while_revalidate: self.stale_while_revalidate,
            ..Default::default()
        }
    }
}

/// Revalidate and stale windows after defaults have been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevalidateWindows {
    pub revalidate: u64,
    pub stale_while_revalidate: u64,
}

/// Parse an optional directive header, falling back to configured defaults.
pub fn parse_revalidate_header(header: Option<&str>, config: &CacheConfig) -> RevalidateWindows {
    let directives = header.map(RevalidateDirectives::parse).unwrap_or_default();
    RevalidateWindows {
        revalidate: directives
            .revalidate
            .unwrap_or(config.default_revalidate_seconds),
        stale_while_revalidate: directives
            .stale_while_revalidate
            .unwrap_or(config.stale_while_revalidate_seconds),
    }
}

/// Build the `Cache-Control` value advertised to shared caches.
pub fn cache_control_header(revalidate: u64, stale_while_revalidate: u64) -> String {
    format!(
        "public, max-age=0, s-maxage={revalidate}, stale-while-revalidate={stale_while_revalidate}"
    )
}
