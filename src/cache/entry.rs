//! Cached entries and the clock that ages them.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// One rendered page plus the policy it was cached under.
///
/// Entries are replaced wholesale on regeneration and never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub result: T,
    /// Milliseconds since the Unix epoch at which the render completed.
    pub created_at_ms: i64,
    pub revalidate_seconds: u64,
    pub stale_while_revalidate_seconds: u64,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl<T> CacheEntry<T> {
    /// Age in milliseconds; clock skew into the past counts as zero.
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.created_at_ms).max(0)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Seconds from creation until the entry can no longer be served.
    pub fn lifetime_seconds(&self) -> u64 {
        self.revalidate_seconds
            .saturating_add(self.stale_while_revalidate_seconds)
    }
}

/// Source of wall-clock time in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        i64::try_from(nanos).unwrap_or(i64::MAX)
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(start_ms),
        }
    }

    pub fn set_ms(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn set_secs(&self, now_secs: i64) {
        self.set_ms(now_secs.saturating_mul(1000));
    }

    pub fn advance_secs(&self, secs: i64) {
        self.now_ms
            .fetch_add(secs.saturating_mul(1000), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(created_at_ms: i64) -> CacheEntry<&'static str> {
        CacheEntry {
            result: "body",
            created_at_ms,
            revalidate_seconds: 60,
            stale_while_revalidate_seconds: 10,
            tags: BTreeSet::from(["blog".to_string()]),
        }
    }

    #[test]
    fn age_never_goes_negative() {
        let entry = entry(5_000);
        assert_eq!(entry.age_ms(7_500), 2_500);
        assert_eq!(entry.age_ms(1_000), 0);
    }

    #[test]
    fn lifetime_sums_windows() {
        let entry = entry(0);
        assert_eq!(entry.lifetime_seconds(), 70);
        assert!(entry.has_tag("blog"));
        assert!(!entry.has_tag("news"));
    }

    #[test]
    fn manual_clock_moves_on_demand() {
        let clock = ManualClock::new(0);
        clock.advance_secs(30);
        assert_eq!(clock.now_ms(), 30_000);
        clock.set_secs(80);
        assert_eq!(clock.now_ms(), 80_000);
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }
}
