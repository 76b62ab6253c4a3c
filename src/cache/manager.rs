//! Cache manager façade.
//!
//! Public entry point for the HTTP layer and operator tooling. A manager is
//! a cheap handle; clones share one cache.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument};

use super::config::{CacheConfig, ConfigError, PageConfig};
use super::coordinator::{
    Coordinator, Freshness, RegenerationFailure, RevalidationResult, classify,
};
use super::entry::{Clock, SystemClock};
use super::keys::{CacheKey, Pattern, cache_key};
use super::remote::{RemoteStore, RemoteTier};
use super::render::{RenderError, RenderPath, Renderer};
use super::stats::Stats;

/// How a page request was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    Hit,
    Stale,
    Miss,
    /// Caching is disabled; the page was rendered directly.
    Bypass,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Stale => "stale",
            Self::Miss => "miss",
            Self::Bypass => "bypass",
        }
    }
}

/// A page result together with the policy it is served under.
#[derive(Debug, Clone)]
pub struct PageOutcome<T> {
    pub output: T,
    pub status: CacheStatus,
    pub revalidate_seconds: u64,
    pub stale_while_revalidate_seconds: u64,
}

/// What the local tier knows about a URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheInfo {
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Age in whole seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revalidate: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale_while_revalidate: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freshness: Option<Freshness>,
    pub regenerating: bool,
}

pub struct CacheManagerBuilder<R: Renderer> {
    config: CacheConfig,
    renderer: R,
    remote: Option<Arc<dyn RemoteStore>>,
    clock: Arc<dyn Clock>,
}

impl<R: Renderer> CacheManagerBuilder<R> {
    /// Attach a shared remote tier.
    pub fn remote(mut self, store: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<CacheManager<R>, ConfigError> {
        self.config.validate()?;
        let remote = self
            .remote
            .map(|store| RemoteTier::new(store, self.config.remote_key_prefix.clone()));
        info!(
            enabled = self.config.enabled,
            max_cache_size = self.config.max_cache_size,
            default_revalidate_seconds = self.config.default_revalidate_seconds,
            stale_while_revalidate_seconds = self.config.stale_while_revalidate_seconds,
            remote_tier = remote.is_some(),
            "Regeneration cache initialized"
        );
        Ok(CacheManager {
            coordinator: Arc::new(Coordinator::new(
                self.config,
                self.renderer,
                remote,
                self.clock,
            )),
        })
    }
}

pub struct CacheManager<R: Renderer> {
    coordinator: Arc<Coordinator<R>>,
}

impl<R: Renderer> Clone for CacheManager<R> {
    fn clone(&self) -> Self {
        Self {
            coordinator: Arc::clone(&self.coordinator),
        }
    }
}

impl<R: Renderer> CacheManager<R> {
    /// Local-only cache on the system clock.
    pub fn new(config: CacheConfig, renderer: R) -> Result<Self, ConfigError> {
        Self::builder(config, renderer).build()
    }

    pub fn builder(config: CacheConfig, renderer: R) -> CacheManagerBuilder<R> {
        CacheManagerBuilder {
            config,
            renderer,
            remote: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Serve a page, rendering only when nothing usable is cached.
    pub async fn get_page(
        &self,
        url: &str,
        request: &R::Request,
        page: Option<&PageConfig>,
    ) -> Result<R::Output, RenderError> {
        self.get_page_with_status(url, request, page)
            .await
            .map(|outcome| outcome.output)
    }

    /// Like [`get_page`](Self::get_page), also reporting how the page was served.
    #[instrument(skip(self, request, page), fields(cache_key = tracing::field::Empty))]
    pub async fn get_page_with_status(
        &self,
        url: &str,
        request: &R::Request,
        page: Option<&PageConfig>,
    ) -> Result<PageOutcome<R::Output>, RenderError> {
        let coordinator = &self.coordinator;

        if !coordinator.config.enabled {
            let output = coordinator
                .render_only(url, request, RenderPath::Sync)
                .await?;
            let policy = coordinator.config.resolve(page);
            return Ok(PageOutcome {
                output,
                status: CacheStatus::Bypass,
                revalidate_seconds: policy.revalidate_seconds,
                stale_while_revalidate_seconds: policy.stale_while_revalidate_seconds,
            });
        }

        let key = cache_key(url);
        tracing::Span::current().record("cache_key", key.as_str());

        if let Some(entry) = coordinator.lookup(&key).await {
            match classify(&entry, coordinator.clock.now_ms()) {
                Freshness::Fresh => {
                    coordinator.stats.record_hit();
                    debug!(outcome = "hit", "serving fresh entry");
                    return Ok(PageOutcome {
                        revalidate_seconds: entry.revalidate_seconds,
                        stale_while_revalidate_seconds: entry.stale_while_revalidate_seconds,
                        output: entry.result,
                        status: CacheStatus::Hit,
                    });
                }
                Freshness::StaleServeable => {
                    coordinator.stats.record_stale_hit();
                    let scheduled = coordinator.schedule_regeneration(
                        url,
                        &key,
                        request.clone(),
                        page.cloned(),
                    );
                    debug!(outcome = "stale", scheduled, "serving stale entry");
                    return Ok(PageOutcome {
                        revalidate_seconds: entry.revalidate_seconds,
                        stale_while_revalidate_seconds: entry.stale_while_revalidate_seconds,
                        output: entry.result,
                        status: CacheStatus::Stale,
                    });
                }
                Freshness::Expired => {
                    debug!(outcome = "expired", "entry past stale window");
                }
            }
        }

        coordinator.stats.record_miss();
        debug!(outcome = "miss", "rendering synchronously");
        let entry = coordinator
            .render_and_store(url, &key, request, page, RenderPath::Sync)
            .await?;
        Ok(PageOutcome {
            revalidate_seconds: entry.revalidate_seconds,
            stale_while_revalidate_seconds: entry.stale_while_revalidate_seconds,
            output: entry.result,
            status: CacheStatus::Miss,
        })
    }

    /// Render now and replace the cached entry on success.
    #[instrument(skip(self, request, page))]
    pub async fn revalidate_page(
        &self,
        url: &str,
        request: &R::Request,
        page: Option<&PageConfig>,
    ) -> RevalidationResult {
        let key = cache_key(url);
        self.coordinator.revalidate(url, &key, request, page).await
    }

    /// Remove the entry for `url` from both tiers. Returns whether a local
    /// entry existed.
    pub async fn invalidate_page(&self, url: &str) -> bool {
        let key = cache_key(url);
        let existed = self.coordinator.store.delete(key.as_str());
        if let Some(remote) = &self.coordinator.remote {
            remote.delete(&key).await;
        }
        debug!(cache_key = %key, existed, "invalidated page");
        existed
    }

    /// Remove every entry whose key matches, in both tiers. Returns the number
    /// of distinct keys removed.
    pub async fn invalidate_pattern(&self, pattern: &Pattern) -> usize {
        let mut removed: HashSet<CacheKey> = self
            .coordinator
            .store
            .delete_matching(|key, _| pattern.matches(key.as_str()))
            .into_iter()
            .collect();
        if let Some(remote) = &self.coordinator.remote {
            removed.extend(remote.delete_matching(|key| pattern.matches(key)).await);
        }
        info!(pattern = ?pattern, removed = removed.len(), "invalidated by pattern");
        removed.len()
    }

    /// Remove every local entry carrying `tag`. The remote tier keeps no tag
    /// index and is left untouched.
    pub fn invalidate_tag(&self, tag: &str) -> usize {
        let removed = self
            .coordinator
            .store
            .delete_matching(|_, entry| entry.has_tag(tag))
            .len();
        info!(tag, removed, "invalidated by tag");
        removed
    }

    /// Flush the local tier, reset statistics, and clear the remote prefix.
    pub async fn invalidate_all(&self) {
        self.coordinator.store.clear();
        self.coordinator.stats.reset();
        let remote_removed = match &self.coordinator.remote {
            Some(remote) => remote.clear().await,
            None => 0,
        };
        info!(remote_removed, "flushed regeneration cache");
    }

    /// Drop local entries that can no longer be served. Callers decide when
    /// to run this.
    pub fn prune_expired(&self) -> usize {
        let now_ms = self.coordinator.clock.now_ms();
        let removed = self
            .coordinator
            .store
            .delete_matching(|_, entry| classify(entry, now_ms) == Freshness::Expired)
            .len();
        if removed > 0 {
            debug!(removed, "pruned expired entries");
        }
        removed
    }

    pub fn stats(&self) -> Stats {
        let coordinator = &self.coordinator;
        coordinator.stats.snapshot(
            coordinator.store.len(),
            coordinator.store.capacity(),
            coordinator.pending.len(),
        )
    }

    /// Whether the local tier holds an entry for `url`.
    pub fn is_cached(&self, url: &str) -> bool {
        self.coordinator.store.contains(cache_key(url).as_str())
    }

    pub fn cache_info(&self, url: &str) -> CacheInfo {
        let key = cache_key(url);
        let coordinator = &self.coordinator;
        let regenerating = coordinator.pending.contains(key.as_str());
        let Some(entry) = coordinator.store.get(key.as_str()) else {
            return CacheInfo {
                regenerating,
                ..Default::default()
            };
        };
        let now_ms = coordinator.clock.now_ms();
        CacheInfo {
            cached: true,
            timestamp: Some(entry.created_at_ms),
            age: Some(u64::try_from(entry.age_ms(now_ms) / 1000).unwrap_or(0)),
            revalidate: Some(entry.revalidate_seconds),
            stale_while_revalidate: Some(entry.stale_while_revalidate_seconds),
            freshness: Some(classify(&entry, now_ms)),
            tags: Some(entry.tags),
            regenerating,
        }
    }

    pub fn is_regenerating(&self, url: &str) -> bool {
        self.coordinator.pending.contains(cache_key(url).as_str())
    }

    pub fn pending_count(&self) -> usize {
        self.coordinator.pending.len()
    }

    /// Resolve once every in-flight regeneration has finished.
    pub async fn wait_idle(&self) {
        self.coordinator.pending.wait_idle().await;
    }

    /// Most recent unresolved regeneration failure for `url`.
    pub fn last_failure(&self, url: &str) -> Option<RegenerationFailure> {
        self.coordinator.last_failure(cache_key(url).as_str())
    }

    /// Recent regeneration failures, oldest first.
    pub fn recent_failures(&self) -> Vec<RegenerationFailure> {
        self.coordinator.recent_failures()
    }
}
