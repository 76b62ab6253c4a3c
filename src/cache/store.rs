//! Local entry store.
//!
//! Holds the authoritative in-process view of cached pages. When an insert
//! would exceed capacity, the oldest tenth of entries by creation time is
//! evicted in one batch (always at least one).

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::RwLock;

use metrics::counter;
use tracing::debug;

use super::entry::CacheEntry;
use super::keys::CacheKey;
use super::lock::{rw_read, rw_write};
use super::stats::METRIC_EVICT_TOTAL;

const SOURCE: &str = "cache::store";

pub struct EntryStore<T> {
    entries: RwLock<HashMap<CacheKey, CacheEntry<T>>>,
    capacity: NonZeroUsize,
}

impl<T: Clone> EntryStore<T> {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    pub fn get(&self, key: &str) -> Option<CacheEntry<T>> {
        rw_read(&self.entries, SOURCE, "get").get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        rw_read(&self.entries, SOURCE, "contains").contains_key(key)
    }

    /// Insert or replace an entry, returning the keys evicted to make room.
    pub fn set(&self, key: CacheKey, entry: CacheEntry<T>) -> Vec<CacheKey> {
        let mut entries = rw_write(&self.entries, SOURCE, "set");
        let mut evicted = Vec::new();

        if !entries.contains_key(&key) && entries.len() >= self.capacity.get() {
            let batch = (entries.len() / 10).max(1);
            evicted = oldest_keys(&entries, batch);
            for victim in &evicted {
                entries.remove(victim);
            }
        }

        entries.insert(key, entry);
        drop(entries);

        if !evicted.is_empty() {
            counter!(METRIC_EVICT_TOTAL).increment(evicted.len() as u64);
            debug!(evicted = evicted.len(), "evicted oldest cache entries");
        }
        evicted
    }

    pub fn delete(&self, key: &str) -> bool {
        rw_write(&self.entries, SOURCE, "delete")
            .remove(key)
            .is_some()
    }

    /// Remove every entry the predicate selects, returning the removed keys.
    pub fn delete_matching<F>(&self, mut predicate: F) -> Vec<CacheKey>
    where
        F: FnMut(&CacheKey, &CacheEntry<T>) -> bool,
    {
        let mut removed = Vec::new();
        rw_write(&self.entries, SOURCE, "delete_matching").retain(|key, entry| {
            if predicate(key, entry) {
                removed.push(key.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn clear(&self) {
        rw_write(&self.entries, SOURCE, "clear").clear();
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }
}

fn oldest_keys<T>(entries: &HashMap<CacheKey, CacheEntry<T>>, count: usize) -> Vec<CacheKey> {
    let mut by_age: Vec<(i64, &CacheKey)> = entries
        .iter()
        .map(|(key, entry)| (entry.created_at_ms, key))
        .collect();
    by_age.sort_unstable();
    by_age
        .into_iter()
        .take(count)
        .map(|(_, key)| key.clone())
        .collect()
}
