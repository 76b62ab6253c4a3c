//! In-flight regeneration tracking.
//!
//! A key is present exactly while a regeneration for it is running. The
//! guard returned by [`PendingRegenerations::try_acquire`] removes the key
//! when dropped, whether the render succeeded, failed, or the task was
//! abandoned. The guarantee is per process only.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::Notify;

use super::keys::CacheKey;

#[derive(Default, Clone)]
pub struct PendingRegenerations {
    /// Key to the time (ms since epoch) its regeneration started.
    keys: Arc<DashMap<CacheKey, i64>>,
    idle: Arc<Notify>,
}

impl PendingRegenerations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the key, or return `None` when a regeneration is already running.
    pub fn try_acquire(&self, key: &CacheKey, started_at_ms: i64) -> Option<RegenerationGuard> {
        match self.keys.entry(key.clone()) {
            Entry::Vacant(vacant) => {
                vacant.insert(started_at_ms);
                Some(RegenerationGuard {
                    key: key.clone(),
                    keys: Arc::clone(&self.keys),
                    idle: Arc::clone(&self.idle),
                })
            }
            Entry::Occupied(_) => None,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains_key(key)
    }

    pub fn started_at_ms(&self, key: &str) -> Option<i64> {
        self.keys.get(key).map(|started| *started)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Wait until no regeneration is running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.keys.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

pub struct RegenerationGuard {
    key: CacheKey,
    keys: Arc<DashMap<CacheKey, i64>>,
    idle: Arc<Notify>,
}

impl Drop for RegenerationGuard {
    fn drop(&mut self) {
        self.keys.remove(&self.key);
        if self.keys.is_empty() {
            self.idle.notify_waiters();
        }
    }
}
