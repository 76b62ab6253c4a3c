//! Cache configuration.
//!
//! `CacheConfig` is fixed at construction; `PageConfig` carries the per-page
//! overrides supplied with each request.

use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_REVALIDATE_SECONDS: u64 = 3600;
const DEFAULT_STALE_WHILE_REVALIDATE_SECONDS: u64 = 60;
const DEFAULT_MAX_CACHE_SIZE: usize = 1000;
const DEFAULT_REMOTE_KEY_PREFIX: &str = "irc:";

/// Construction-time settings for the regeneration cache.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Reserved for an on-disk tier; not read by the in-memory core.
    pub cache_dir: Option<PathBuf>,
    /// Seconds an entry is served as fresh when the page sets no override.
    pub default_revalidate_seconds: u64,
    /// Seconds past the revalidate window during which stale data is served.
    pub stale_while_revalidate_seconds: u64,
    /// Maximum number of entries held by the local tier.
    pub max_cache_size: usize,
    /// When false every request renders and nothing is cached.
    pub enabled: bool,
    /// Namespace prepended to every key written to the remote tier.
    pub remote_key_prefix: String,
    /// Upper bound on a single render; unset means renders may run forever.
    pub render_timeout_ms: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            default_revalidate_seconds: DEFAULT_REVALIDATE_SECONDS,
            stale_while_revalidate_seconds: DEFAULT_STALE_WHILE_REVALIDATE_SECONDS,
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            enabled: true,
            remote_key_prefix: DEFAULT_REMOTE_KEY_PREFIX.to_string(),
            render_timeout_ms: None,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid cache configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

impl CacheConfig {
    /// Reject settings the cache cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_cache_size == 0 {
            return Err(ConfigError::invalid(
                "max_cache_size",
                "must be greater than zero",
            ));
        }
        if self.remote_key_prefix.trim().is_empty() {
            return Err(ConfigError::invalid(
                "remote_key_prefix",
                "must not be empty",
            ));
        }
        if self.render_timeout_ms == Some(0) {
            return Err(ConfigError::invalid(
                "render_timeout_ms",
                "must be greater than zero when set",
            ));
        }
        Ok(())
    }

    pub fn max_cache_size_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_cache_size).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn render_timeout(&self) -> Option<Duration> {
        self.render_timeout_ms.map(Duration::from_millis)
    }

    /// Merge a page override with the configured defaults.
    pub fn resolve(&self, page: Option<&PageConfig>) -> EntryPolicy {
        let page = page.cloned().unwrap_or_default();
        EntryPolicy {
            revalidate_seconds: page.revalidate.unwrap_or(self.default_revalidate_seconds),
            stale_while_revalidate_seconds: page
                .stale_while_revalidate
                .unwrap_or(self.stale_while_revalidate_seconds),
            tags: page.tags,
        }
    }
}

/// Per-page override supplied with a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PageConfig {
    pub revalidate: Option<u64>,
    pub stale_while_revalidate: Option<u64>,
    pub tags: BTreeSet<String>,
}

impl PageConfig {
    pub fn revalidate(mut self, seconds: u64) -> Self {
        self.revalidate = Some(seconds);
        self
    }

    pub fn stale_while_revalidate(mut self, seconds: u64) -> Self {
        self.stale_while_revalidate = Some(seconds);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }
}

/// Windows and tags fixed onto an entry when it is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPolicy {
    pub revalidate_seconds: u64,
    pub stale_while_revalidate_seconds: u64,
    pub tags: BTreeSet<String>,
}
