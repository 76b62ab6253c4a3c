mod common;

use common::{Harness, body, config};
use regencache::cache::{CacheConfig, CacheStatus, Freshness, PageConfig, Pattern};
use regencache::infra::upstream::UpstreamRequest;

#[tokio::test]
async fn fresh_then_stale_then_background_refresh() {
    let h = Harness::new(config(60, 10));

    assert_eq!(h.get("/a").await, "/a v1");
    assert_eq!(h.script.calls(), 1);

    h.clock.set_secs(30);
    assert_eq!(h.get("/a").await, "/a v1");
    assert_eq!(h.script.calls(), 1);

    h.clock.set_secs(65);
    let outcome = h
        .cache
        .get_page_with_status("/a", &UpstreamRequest::default(), None)
        .await
        .expect("stale entry served");
    assert_eq!(outcome.status, CacheStatus::Stale);
    assert_eq!(body(&outcome.output), "/a v1");

    let stats = h.cache.stats();
    assert_eq!(stats.stale_hits, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.revalidations, 1);

    h.cache.wait_idle().await;
    assert_eq!(h.script.calls(), 2);

    let info = h.cache.cache_info("/a");
    assert_eq!(info.timestamp, Some(65_000));
    assert_eq!(info.freshness, Some(Freshness::Fresh));
    assert_eq!(h.get("/a").await, "/a v2");
}

#[tokio::test]
async fn concurrent_stale_hits_trigger_one_regeneration() {
    let h = Harness::new(config(60, 10));
    h.get("/a").await;

    h.script.close_gate();
    h.clock.set_secs(65);
    let request = UpstreamRequest::default();
    let (first, second) = futures::join!(
        h.cache.get_page_with_status("/a", &request, None),
        h.cache.get_page_with_status("/a", &request, None),
    );
    let first = first.expect("first request served");
    let second = second.expect("second request served");

    assert_eq!(first.status, CacheStatus::Stale);
    assert_eq!(second.status, CacheStatus::Stale);
    assert_eq!(body(&first.output), "/a v1");
    assert_eq!(body(&second.output), "/a v1");
    assert!(h.cache.is_regenerating("/a"));
    assert_eq!(h.cache.pending_count(), 1);

    // A third stale hit while the regeneration is still held is also deduplicated.
    h.get("/a").await;

    h.script.release(1);
    h.cache.wait_idle().await;

    assert_eq!(h.script.calls(), 2);
    assert!(!h.cache.is_regenerating("/a"));
    assert_eq!(h.cache.stats().revalidations, 1);
    assert_eq!(h.cache.stats().stale_hits, 3);
}

#[tokio::test]
async fn expired_entries_render_synchronously() {
    let h = Harness::new(config(60, 10));
    h.get("/a").await;

    h.clock.set_secs(80);
    let outcome = h
        .cache
        .get_page_with_status("/a", &UpstreamRequest::default(), None)
        .await
        .expect("render succeeds");

    assert_eq!(outcome.status, CacheStatus::Miss);
    assert_eq!(body(&outcome.output), "/a v2");
    assert_eq!(h.script.calls(), 2);
    assert_eq!(h.cache.cache_info("/a").timestamp, Some(80_000));
    assert_eq!(h.cache.pending_count(), 0);
    assert_eq!(h.cache.stats().misses, 2);
}

#[tokio::test]
async fn tag_invalidation_only_touches_tagged_entries() {
    let h = Harness::new(config(60, 10));
    let request = UpstreamRequest::default();
    let blog = PageConfig::default().tag("blog");

    for url in ["/blog/one", "/blog/two"] {
        h.cache
            .get_page(url, &request, Some(&blog))
            .await
            .expect("render succeeds");
    }
    h.get("/about").await;
    h.get("/about").await;
    let before = h.cache.stats();

    assert_eq!(h.cache.invalidate_tag("blog"), 2);

    assert!(!h.cache.is_cached("/blog/one"));
    assert!(!h.cache.is_cached("/blog/two"));
    assert!(h.cache.is_cached("/about"));
    let after = h.cache.stats();
    assert_eq!(after.hits, before.hits);
    assert_eq!(after.misses, before.misses);
    assert_eq!(after.size, 1);
}

#[tokio::test]
async fn failed_background_regeneration_keeps_stale_entry() {
    let h = Harness::new(config(60, 10));
    h.get("/a").await;
    let created = h.cache.cache_info("/a").timestamp;

    h.script.fail(true);
    h.clock.set_secs(65);
    let outcome = h
        .cache
        .get_page_with_status("/a", &UpstreamRequest::default(), None)
        .await
        .expect("stale hit never surfaces the regeneration failure");
    assert_eq!(outcome.status, CacheStatus::Stale);
    h.cache.wait_idle().await;

    assert_eq!(h.script.calls(), 2);
    assert_eq!(h.cache.cache_info("/a").timestamp, created);
    let failure = h.cache.last_failure("/a").expect("failure recorded");
    assert_eq!(failure.url, "/a");
    assert!(failure.error.contains("scripted failure"));
    assert_eq!(h.cache.recent_failures().len(), 1);

    // The stale entry keeps being served, and each stale hit retries.
    assert_eq!(h.get("/a").await, "/a v1");
    h.cache.wait_idle().await;
    assert_eq!(h.script.calls(), 3);
    assert_eq!(h.cache.cache_info("/a").timestamp, created);
    assert_eq!(h.cache.recent_failures().len(), 2);

    // A later successful regeneration clears the latest failure.
    h.script.fail(false);
    let result = h
        .cache
        .revalidate_page("/a", &UpstreamRequest::default(), None)
        .await;
    assert!(result.success);
    assert!(h.cache.last_failure("/a").is_none());
    assert_eq!(h.cache.recent_failures().len(), 2);
}

#[tokio::test]
async fn expired_render_failure_is_returned_to_the_caller() {
    let h = Harness::new(config(60, 10));
    h.get("/a").await;

    h.script.fail(true);
    h.clock.set_secs(200);
    let err = h
        .cache
        .get_page("/a", &UpstreamRequest::default(), None)
        .await
        .expect_err("expired entry cannot be served");
    assert!(err.to_string().contains("scripted failure"));
}

#[tokio::test]
async fn explicit_revalidation_replaces_entry_and_reports_result() {
    let h = Harness::new(config(60, 10));
    h.get("/a").await;
    h.clock.set_secs(5);

    let page = PageConfig::default().revalidate(120).tag("docs");
    let result = h
        .cache
        .revalidate_page("/a", &UpstreamRequest::default(), Some(&page))
        .await;

    assert!(result.success);
    assert_eq!(result.url, "/a");
    assert_eq!(result.timestamp_ms, 5_000);
    assert!(result.error.is_none());
    let info = h.cache.cache_info("/a");
    assert_eq!(info.revalidate, Some(120));
    assert_eq!(info.stale_while_revalidate, Some(10));
    assert!(info.tags.expect("tags").contains("docs"));
    assert_eq!(h.get("/a").await, "/a v2");

    h.script.fail(true);
    let failed = h
        .cache
        .revalidate_page("/a", &UpstreamRequest::default(), None)
        .await;
    assert!(!failed.success);
    assert!(failed.error.expect("error message").contains("scripted failure"));
    assert_eq!(h.get("/a").await, "/a v2");
}

#[tokio::test]
async fn page_overrides_set_entry_windows() {
    let h = Harness::new(config(3600, 60));
    let page = PageConfig::default().revalidate(0).stale_while_revalidate(0);

    h.cache
        .get_page("/live", &UpstreamRequest::default(), Some(&page))
        .await
        .expect("render succeeds");
    h.cache
        .get_page("/live", &UpstreamRequest::default(), Some(&page))
        .await
        .expect("render succeeds");

    // Zero windows expire immediately, so every request renders.
    assert_eq!(h.script.calls(), 2);
    assert_eq!(h.cache.stats().hits, 0);
}

#[tokio::test]
async fn disabled_cache_renders_every_request() {
    let h = Harness::new(CacheConfig {
        enabled: false,
        ..config(60, 10)
    });

    let outcome = h
        .cache
        .get_page_with_status("/a", &UpstreamRequest::default(), None)
        .await
        .expect("render succeeds");
    assert_eq!(outcome.status, CacheStatus::Bypass);
    h.get("/a").await;

    assert_eq!(h.script.calls(), 2);
    assert!(!h.cache.is_cached("/a"));
    let stats = h.cache.stats();
    assert_eq!((stats.hits, stats.misses, stats.size), (0, 0, 0));
}

#[tokio::test]
async fn disabled_cache_revalidation_records_nothing() {
    let h = Harness::new(CacheConfig {
        enabled: false,
        ..config(60, 10)
    });
    let request = UpstreamRequest::default();

    let ok = h.cache.revalidate_page("/a", &request, None).await;
    assert!(ok.success);

    h.script.fail(true);
    let failed = h.cache.revalidate_page("/a", &request, None).await;
    assert!(!failed.success);
    assert!(failed.error.expect("error message").contains("scripted failure"));

    assert_eq!(h.script.calls(), 2);
    assert!(!h.cache.is_cached("/a"));
    assert_eq!(h.cache.stats().revalidations, 0);
    assert!(h.cache.last_failure("/a").is_none());
    assert!(h.cache.recent_failures().is_empty());
}

#[tokio::test]
async fn capacity_evicts_oldest_entries() {
    let h = Harness::new(CacheConfig {
        max_cache_size: 3,
        ..config(3600, 60)
    });

    for (second, url) in ["/1", "/2", "/3", "/4"].into_iter().enumerate() {
        h.clock.set_secs(second as i64);
        h.get(url).await;
    }

    assert_eq!(h.cache.stats().size, 3);
    assert!(!h.cache.is_cached("/1"));
    for url in ["/2", "/3", "/4"] {
        assert!(h.cache.is_cached(url), "{url} should survive eviction");
    }
}

#[tokio::test]
async fn query_strings_are_part_of_the_key() {
    let h = Harness::new(config(60, 10));

    h.get("/search?a=1&b=2").await;
    h.get("https://example.com/search?a=1&b=2#results").await;
    h.get("/search?b=2&a=1").await;

    assert_eq!(h.script.calls(), 2);
    assert_eq!(
        h.script.rendered_urls(),
        vec!["/search?a=1&b=2".to_string(), "/search?b=2&a=1".to_string()]
    );
}

#[tokio::test]
async fn pattern_invalidation_and_full_flush() {
    let h = Harness::new(config(60, 10));
    for url in ["/blog/1", "/blog/2", "/docs/1"] {
        h.get(url).await;
    }

    let pattern = Pattern::regex(r"^/blog/\d+$").expect("valid regex");
    assert_eq!(h.cache.invalidate_pattern(&pattern).await, 2);
    assert!(h.cache.is_cached("/docs/1"));
    assert!(h.cache.invalidate_page("/docs/1").await);
    assert!(!h.cache.invalidate_page("/docs/1").await);

    h.get("/x").await;
    h.get("/x").await;
    h.cache.invalidate_all().await;

    let stats = h.cache.stats();
    assert_eq!((stats.hits, stats.misses, stats.size), (0, 0, 0));
    assert_eq!(stats.hit_rate, 0.0);
}

#[tokio::test]
async fn prune_removes_only_expired_entries() {
    let h = Harness::new(config(60, 10));
    h.get("/old").await;
    h.clock.set_secs(50);
    h.get("/new").await;

    h.clock.set_secs(75);
    assert_eq!(h.cache.prune_expired(), 1);
    assert!(!h.cache.is_cached("/old"));
    assert!(h.cache.is_cached("/new"));
    assert_eq!(h.cache.prune_expired(), 0);
}

#[tokio::test]
async fn cache_info_for_unknown_url() {
    let h = Harness::new(config(60, 10));
    let info = h.cache.cache_info("/missing");
    assert!(!info.cached);
    assert!(info.timestamp.is_none());
    assert!(!info.regenerating);
}
