//! Hit/miss accounting.

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;
use serde::Serialize;

pub const METRIC_HIT_TOTAL: &str = "regencache_hit_total";
pub const METRIC_MISS_TOTAL: &str = "regencache_miss_total";
pub const METRIC_STALE_HIT_TOTAL: &str = "regencache_stale_hit_total";
pub const METRIC_REVALIDATION_TOTAL: &str = "regencache_revalidation_total";
pub const METRIC_EVICT_TOTAL: &str = "regencache_evict_total";
pub const METRIC_REMOTE_ERROR_TOTAL: &str = "regencache_remote_error_total";
pub const METRIC_RENDER_MS: &str = "regencache_render_ms";

/// Cumulative counters, reset only by a full flush.
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    stale_hits: AtomicU64,
    revalidations: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_HIT_TOTAL).increment(1);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_MISS_TOTAL).increment(1);
    }

    pub(crate) fn record_stale_hit(&self) {
        self.stale_hits.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_STALE_HIT_TOTAL).increment(1);
    }

    pub(crate) fn record_revalidation(&self) {
        self.revalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.stale_hits.store(0, Ordering::Relaxed);
        self.revalidations.store(0, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, size: usize, max_size: usize, pending: usize) -> Stats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        Stats {
            hits,
            misses,
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            revalidations: self.revalidations.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            size,
            max_size,
            pending,
        }
    }
}

/// Point-in-time view of cache activity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Stats {
    pub hits: u64,
    pub misses: u64,
    pub stale_hits: u64,
    /// Regenerations started, background and explicit.
    pub revalidations: u64,
    /// `hits / (hits + misses)`, or zero before the first lookup.
    pub hit_rate: f64,
    pub size: usize,
    pub max_size: usize,
    pub pending: usize,
}
