//! Remote (shared) cache tier.
//!
//! [`RemoteStore`] is the storage capability: any key-value service with
//! get/set/delete/delete-many/keys-by-prefix fits. [`RemoteTier`] wraps a
//! store with the configured key prefix and entry serialization, and is
//! advisory: every failure is logged, counted, and reported to callers as a
//! miss or a no-op.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::entry::CacheEntry;
use super::keys::CacheKey;
use super::stats::METRIC_REMOTE_ERROR_TOTAL;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote cache backend error: {0}")]
    Backend(String),
    #[error("remote cache entry could not be encoded or decoded: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RemoteError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

/// Key-value service backing the shared tier.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, RemoteError>;

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), RemoteError>;

    /// Returns the number of keys removed.
    async fn delete(&self, key: &str) -> Result<u64, RemoteError>;

    async fn delete_many(&self, keys: &[String]) -> Result<u64, RemoteError>;

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, RemoteError>;
}

/// Prefix-aware, failure-swallowing adapter over a [`RemoteStore`].
#[derive(Clone)]
pub struct RemoteTier {
    store: Arc<dyn RemoteStore>,
    prefix: String,
}

impl RemoteTier {
    pub fn new(store: Arc<dyn RemoteStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    fn remote_key(&self, key: &CacheKey) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn report(&self, op: &'static str, key: &str, error: &RemoteError) {
        counter!(METRIC_REMOTE_ERROR_TOTAL, "op" => op).increment(1);
        warn!(
            op,
            remote_key = key,
            error = %error,
            "remote cache operation failed; continuing without it"
        );
    }

    /// Fetch and decode an entry. Failures and corrupt entries read as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<CacheEntry<T>> {
        let remote_key = self.remote_key(key);
        let raw = match self.store.get(&remote_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(error) => {
                self.report("get", &remote_key, &error);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(entry) => Some(entry),
            Err(error) => {
                self.report("decode", &remote_key, &RemoteError::from(error));
                None
            }
        }
    }

    /// Encode and write an entry, expiring it when it could no longer be served.
    pub async fn set<T: Serialize>(&self, key: &CacheKey, entry: &CacheEntry<T>) {
        let remote_key = self.remote_key(key);
        let raw = match serde_json::to_string(entry) {
            Ok(raw) => raw,
            Err(error) => {
                self.report("encode", &remote_key, &RemoteError::from(error));
                return;
            }
        };
        let ttl_seconds = entry.lifetime_seconds().max(1);
        if let Err(error) = self.store.set(&remote_key, &raw, ttl_seconds).await {
            self.report("set", &remote_key, &error);
        }
    }

    pub async fn delete(&self, key: &CacheKey) -> bool {
        let remote_key = self.remote_key(key);
        match self.store.delete(&remote_key).await {
            Ok(removed) => removed > 0,
            Err(error) => {
                self.report("delete", &remote_key, &error);
                false
            }
        }
    }

    /// Remove every remote entry whose cache key satisfies the predicate,
    /// returning the cache keys that were deleted.
    pub async fn delete_matching<F>(&self, predicate: F) -> HashSet<CacheKey>
    where
        F: Fn(&str) -> bool,
    {
        let keys = match self.store.keys_with_prefix(&self.prefix).await {
            Ok(keys) => keys,
            Err(error) => {
                self.report("keys", &self.prefix, &error);
                return HashSet::new();
            }
        };

        let (remote_keys, cache_keys): (Vec<String>, HashSet<CacheKey>) = keys
            .into_iter()
            .filter_map(|remote_key| {
                let key = remote_key.strip_prefix(self.prefix.as_str())?;
                predicate(key).then(|| (remote_key.clone(), CacheKey::from_canonical(key)))
            })
            .unzip();

        if remote_keys.is_empty() {
            return HashSet::new();
        }

        match self.store.delete_many(&remote_keys).await {
            Ok(removed) => {
                debug!(removed, "removed matching remote cache entries");
                cache_keys
            }
            Err(error) => {
                self.report("delete_many", &self.prefix, &error);
                HashSet::new()
            }
        }
    }

    /// Remove every key under the configured prefix.
    pub async fn clear(&self) -> usize {
        self.delete_matching(|_| true).await.len()
    }
}

/// In-process [`RemoteStore`] with TTL expiry.
///
/// Useful for single-node deployments and tests; it shares nothing across
/// processes.
#[derive(Default, Clone)]
pub struct MemoryRemoteStore {
    values: Arc<DashMap<String, (String, Instant)>>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.values
            .iter()
            .filter(|item| item.value().1 > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write a raw value directly, bypassing entry encoding.
    pub fn insert_raw(&self, key: impl Into<String>, value: impl Into<String>, ttl: Duration) {
        self.values
            .insert(key.into(), (value.into(), Instant::now() + ttl));
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, RemoteError> {
        let now = Instant::now();
        let value = self
            .values
            .get(key)
            .filter(|item| item.value().1 > now)
            .map(|item| item.value().0.clone());
        if value.is_none() {
            self.values.remove_if(key, |_, (_, expires_at)| *expires_at <= now);
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), RemoteError> {
        self.insert_raw(key, value, Duration::from_secs(ttl_seconds));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<u64, RemoteError> {
        Ok(u64::from(self.values.remove(key).is_some()))
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64, RemoteError> {
        let removed = keys
            .iter()
            .filter(|key| self.values.remove(key.as_str()).is_some())
            .count();
        Ok(removed as u64)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, RemoteError> {
        let now = Instant::now();
        Ok(self
            .values
            .iter()
            .filter(|item| item.key().starts_with(prefix) && item.value().1 > now)
            .map(|item| item.key().clone())
            .collect())
    }
}
