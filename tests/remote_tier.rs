mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{Harness, config};
use regencache::cache::{MemoryRemoteStore, Pattern, RemoteError, RemoteStore};

struct Unreachable;

#[async_trait]
impl RemoteStore for Unreachable {
    async fn get(&self, _key: &str) -> Result<Option<String>, RemoteError> {
        Err(RemoteError::backend("connection refused"))
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: u64) -> Result<(), RemoteError> {
        Err(RemoteError::backend("connection refused"))
    }

    async fn delete(&self, _key: &str) -> Result<u64, RemoteError> {
        Err(RemoteError::backend("connection refused"))
    }

    async fn delete_many(&self, _keys: &[String]) -> Result<u64, RemoteError> {
        Err(RemoteError::backend("connection refused"))
    }

    async fn keys_with_prefix(&self, _prefix: &str) -> Result<Vec<String>, RemoteError> {
        Err(RemoteError::backend("connection refused"))
    }
}

#[tokio::test]
async fn remote_hits_populate_the_local_tier() {
    let remote = MemoryRemoteStore::new();
    let writer = Harness::with_remote(config(60, 10), Arc::new(remote.clone()));
    let reader = Harness::with_remote(config(60, 10), Arc::new(remote.clone()));

    assert_eq!(writer.get("/shared").await, "/shared v1");
    assert!(
        remote
            .get("irc:/shared")
            .await
            .expect("memory store")
            .is_some()
    );

    assert!(!reader.cache.is_cached("/shared"));
    assert_eq!(reader.get("/shared").await, "/shared v1");
    assert_eq!(reader.script.calls(), 0);
    assert!(reader.cache.is_cached("/shared"));
    assert_eq!(reader.cache.stats().hits, 1);
}

#[tokio::test]
async fn remote_entries_keep_their_age() {
    let remote = MemoryRemoteStore::new();
    let writer = Harness::with_remote(config(60, 10), Arc::new(remote.clone()));
    let reader = Harness::with_remote(config(60, 10), Arc::new(remote.clone()));

    writer.get("/a").await;
    reader.clock.set_secs(65);

    // Read through as stale: served, then regenerated locally.
    assert_eq!(reader.get("/a").await, "/a v1");
    reader.cache.wait_idle().await;
    assert_eq!(reader.script.calls(), 1);
    assert_eq!(reader.cache.stats().stale_hits, 1);
    assert_eq!(reader.cache.cache_info("/a").timestamp, Some(65_000));
}

#[tokio::test]
async fn failing_remote_tier_degrades_to_local_only() {
    let h = Harness::with_remote(config(60, 10), Arc::new(Unreachable));

    assert_eq!(h.get("/a").await, "/a v1");
    assert_eq!(h.get("/a").await, "/a v1");
    assert_eq!(h.script.calls(), 1);

    assert!(h.cache.invalidate_page("/a").await);
    assert_eq!(
        h.cache
            .invalidate_pattern(&Pattern::Prefix("/".to_string()))
            .await,
        0
    );
    h.cache.invalidate_all().await;
}

#[tokio::test]
async fn corrupt_remote_entries_are_rendered_fresh() {
    let remote = MemoryRemoteStore::new();
    remote.insert_raw("irc:/a", "not json", Duration::from_secs(60));
    let h = Harness::with_remote(config(60, 10), Arc::new(remote.clone()));

    assert_eq!(h.get("/a").await, "/a v1");
    assert_eq!(h.script.calls(), 1);
    let raw = remote
        .get("irc:/a")
        .await
        .expect("memory store")
        .expect("entry rewritten");
    assert!(raw.starts_with('{'));
}

#[tokio::test]
async fn pattern_invalidation_counts_keys_across_tiers() {
    let remote = MemoryRemoteStore::new();
    let first = Harness::with_remote(config(60, 10), Arc::new(remote.clone()));
    let second = Harness::with_remote(config(60, 10), Arc::new(remote.clone()));

    first.get("/blog/1").await;
    second.get("/blog/2").await;
    second.get("/docs").await;

    let removed = first
        .cache
        .invalidate_pattern(&Pattern::Prefix("/blog/".to_string()))
        .await;

    assert_eq!(removed, 2);
    assert!(!first.cache.is_cached("/blog/1"));
    assert!(remote.get("irc:/blog/2").await.expect("store").is_none());
    assert!(remote.get("irc:/docs").await.expect("store").is_some());
    // Other processes keep their local copies until they are told.
    assert!(second.cache.is_cached("/blog/2"));
}

#[tokio::test]
async fn tag_invalidation_leaves_remote_entries() {
    let remote = MemoryRemoteStore::new();
    let h = Harness::with_remote(config(60, 10), Arc::new(remote.clone()));
    let blog = regencache::cache::PageConfig::default().tag("blog");
    h.cache
        .get_page(
            "/blog/1",
            &regencache::infra::upstream::UpstreamRequest::default(),
            Some(&blog),
        )
        .await
        .expect("render succeeds");

    assert_eq!(h.cache.invalidate_tag("blog"), 1);
    assert!(!h.cache.is_cached("/blog/1"));
    assert!(remote.get("irc:/blog/1").await.expect("store").is_some());

    // The next lookup reads the entry back from the remote tier.
    h.get("/blog/1").await;
    assert_eq!(h.script.calls(), 1);
}

#[tokio::test]
async fn full_flush_only_clears_the_configured_prefix() {
    let remote = MemoryRemoteStore::new();
    remote.insert_raw("other:/a", "kept", Duration::from_secs(60));
    let h = Harness::with_remote(config(60, 10), Arc::new(remote.clone()));
    h.get("/a").await;
    h.get("/b").await;

    h.cache.invalidate_all().await;

    assert_eq!(remote.len(), 1);
    assert!(remote.get("other:/a").await.expect("store").is_some());
    assert_eq!(h.cache.stats().size, 0);
}

#[tokio::test(start_paused = true)]
async fn remote_entries_expire_after_both_windows() {
    let remote = MemoryRemoteStore::new();
    let h = Harness::with_remote(config(60, 10), Arc::new(remote.clone()));
    h.get("/a").await;

    tokio::time::advance(Duration::from_secs(69)).await;
    assert!(remote.get("irc:/a").await.expect("store").is_some());

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(remote.get("irc:/a").await.expect("store").is_none());
}
