//! Revalidation coordinator.
//!
//! Freshness is derived on every lookup from the entry's age:
//!
//! | state             | condition                        |
//! |-------------------|----------------------------------|
//! | `Fresh`           | `age < revalidate`               |
//! | `StaleServeable`  | `age < revalidate + swr`         |
//! | `Expired`         | otherwise                        |
//!
//! Stale hits schedule at most one background regeneration per key. A failed
//! regeneration leaves the stale entry in place and is recorded, never
//! surfaced to the request that triggered it.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use metrics::counter;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::config::{CacheConfig, PageConfig};
use super::entry::{CacheEntry, Clock};
use super::keys::CacheKey;
use super::lock::mutex_lock;
use super::pending::PendingRegenerations;
use super::remote::RemoteTier;
use super::render::{self, RenderError, RenderPath, Renderer};
use super::stats::{METRIC_REVALIDATION_TOTAL, StatsCounters};
use super::store::EntryStore;

const SOURCE: &str = "cache::coordinator";
const FAILURE_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Fresh,
    StaleServeable,
    Expired,
}

/// Classify an entry against its own windows at `now_ms`.
pub fn classify<T>(entry: &CacheEntry<T>, now_ms: i64) -> Freshness {
    let age_ms = i128::from(entry.age_ms(now_ms));
    let revalidate_ms = i128::from(entry.revalidate_seconds) * 1000;
    let lifetime_ms = revalidate_ms + i128::from(entry.stale_while_revalidate_seconds) * 1000;

    if age_ms < revalidate_ms {
        Freshness::Fresh
    } else if age_ms < lifetime_ms {
        Freshness::StaleServeable
    } else {
        Freshness::Expired
    }
}

/// Outcome of an explicit revalidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevalidationResult {
    pub success: bool,
    pub url: String,
    pub duration_ms: u64,
    pub timestamp_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A regeneration that did not replace its entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegenerationFailure {
    pub key: CacheKey,
    pub url: String,
    pub error: String,
    pub duration_ms: u64,
    pub timestamp_ms: i64,
}

#[derive(Default)]
struct FailureLog {
    latest: HashMap<CacheKey, RegenerationFailure>,
    recent: VecDeque<RegenerationFailure>,
}

/// Shared state behind a cache manager; background tasks hold an `Arc` to it.
pub(crate) struct Coordinator<R: Renderer> {
    pub(crate) config: CacheConfig,
    pub(crate) renderer: R,
    pub(crate) store: EntryStore<R::Output>,
    pub(crate) remote: Option<RemoteTier>,
    pub(crate) pending: PendingRegenerations,
    pub(crate) stats: StatsCounters,
    pub(crate) clock: Arc<dyn Clock>,
    failures: Mutex<FailureLog>,
}

impl<R: Renderer> Coordinator<R> {
    pub(crate) fn new(
        config: CacheConfig,
        renderer: R,
        remote: Option<RemoteTier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = EntryStore::new(config.max_cache_size_non_zero());
        Self {
            config,
            renderer,
            store,
            remote,
            pending: PendingRegenerations::new(),
            stats: StatsCounters::default(),
            clock,
            failures: Mutex::new(FailureLog::default()),
        }
    }

    /// Local lookup, falling back to the remote tier. A remote hit is copied
    /// into the local store before it is returned.
    pub(crate) async fn lookup(&self, key: &CacheKey) -> Option<CacheEntry<R::Output>> {
        if let Some(entry) = self.store.get(key.as_str()) {
            return Some(entry);
        }
        let remote = self.remote.as_ref()?;
        let entry = remote.get::<R::Output>(key).await?;
        debug!(cache_key = %key, "remote tier hit, populating local store");
        self.store.set(key.clone(), entry.clone());
        Some(entry)
    }

    /// Render without touching either tier.
    pub(crate) async fn render_only(
        &self,
        url: &str,
        request: &R::Request,
        path: RenderPath,
    ) -> Result<R::Output, RenderError> {
        render::invoke(
            &self.renderer,
            url,
            request,
            self.config.render_timeout(),
            path,
        )
        .await
    }

    /// Render and replace the entry in both tiers.
    pub(crate) async fn render_and_store(
        &self,
        url: &str,
        key: &CacheKey,
        request: &R::Request,
        page: Option<&PageConfig>,
        path: RenderPath,
    ) -> Result<CacheEntry<R::Output>, RenderError> {
        let output = self.render_only(url, request, path).await?;

        let hinted = match page {
            Some(_) => None,
            None => self.renderer.page_config(&output),
        };
        let policy = self.config.resolve(page.or(hinted.as_ref()));
        let entry = CacheEntry {
            result: output,
            created_at_ms: self.clock.now_ms(),
            revalidate_seconds: policy.revalidate_seconds,
            stale_while_revalidate_seconds: policy.stale_while_revalidate_seconds,
            tags: policy.tags,
        };

        self.store.set(key.clone(), entry.clone());
        if let Some(remote) = &self.remote {
            remote.set(key, &entry).await;
        }
        Ok(entry)
    }

    /// Start a background regeneration unless one is already running for
    /// this key. Returns whether a regeneration was started.
    pub(crate) fn schedule_regeneration(
        self: &Arc<Self>,
        url: &str,
        key: &CacheKey,
        request: R::Request,
        page: Option<PageConfig>,
    ) -> bool {
        let Some(guard) = self.pending.try_acquire(key, self.clock.now_ms()) else {
            debug!(cache_key = %key, "regeneration already pending");
            return false;
        };
        self.stats.record_revalidation();

        let coordinator = Arc::clone(self);
        let url = url.to_string();
        let key = key.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let started_at = Instant::now();
            let result = coordinator
                .render_and_store(
                    &url,
                    &key,
                    &request,
                    page.as_ref(),
                    RenderPath::Background,
                )
                .await;
            coordinator.finish_regeneration(&key, &url, result.err(), started_at, "background");
        });
        true
    }

    /// Forced regeneration, bypassing freshness and the pending set.
    pub(crate) async fn revalidate(
        &self,
        url: &str,
        key: &CacheKey,
        request: &R::Request,
        page: Option<&PageConfig>,
    ) -> RevalidationResult {
        let timestamp_ms = self.clock.now_ms();
        let started_at = Instant::now();

        // Disabled caches render without recording stats or failures.
        let error = if self.config.enabled {
            self.stats.record_revalidation();
            self.render_and_store(url, key, request, page, RenderPath::Explicit)
                .await
                .err()
        } else {
            self.render_only(url, request, RenderPath::Explicit)
                .await
                .err()
        };

        let duration_ms = elapsed_ms(started_at);
        let message = error.as_ref().map(ToString::to_string);
        if self.config.enabled {
            self.finish_regeneration(key, url, error, started_at, "explicit");
        }

        RevalidationResult {
            success: message.is_none(),
            url: url.to_string(),
            duration_ms,
            timestamp_ms,
            error: message,
        }
    }

    fn finish_regeneration(
        &self,
        key: &CacheKey,
        url: &str,
        error: Option<RenderError>,
        started_at: Instant,
        trigger: &'static str,
    ) {
        let duration_ms = elapsed_ms(started_at);
        match error {
            None => {
                counter!(METRIC_REVALIDATION_TOTAL, "outcome" => "success").increment(1);
                mutex_lock(&self.failures, SOURCE, "clear_failure")
                    .latest
                    .remove(key);
                info!(cache_key = %key, trigger, duration_ms, "page regenerated");
            }
            Some(error) => {
                counter!(METRIC_REVALIDATION_TOTAL, "outcome" => "failure").increment(1);
                warn!(
                    cache_key = %key,
                    trigger,
                    duration_ms,
                    error = %error,
                    "page regeneration failed; keeping existing entry"
                );
                self.record_failure(RegenerationFailure {
                    key: key.clone(),
                    url: url.to_string(),
                    error: error.to_string(),
                    duration_ms,
                    timestamp_ms: self.clock.now_ms(),
                });
            }
        }
    }

    fn record_failure(&self, failure: RegenerationFailure) {
        let mut log = mutex_lock(&self.failures, SOURCE, "record_failure");
        if log.recent.len() == FAILURE_HISTORY_LIMIT {
            log.recent.pop_front();
        }
        log.recent.push_back(failure.clone());
        log.latest.insert(failure.key.clone(), failure);
    }

    pub(crate) fn last_failure(&self, key: &str) -> Option<RegenerationFailure> {
        mutex_lock(&self.failures, SOURCE, "last_failure")
            .latest
            .get(key)
            .cloned()
    }

    pub(crate) fn recent_failures(&self) -> Vec<RegenerationFailure> {
        mutex_lock(&self.failures, SOURCE, "recent_failures")
            .recent
            .iter()
            .cloned()
            .collect()
    }
}

fn elapsed_ms(started_at: Instant) -> u64 {
    u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
}
