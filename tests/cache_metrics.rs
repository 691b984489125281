use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use querycache::cache::{
    CacheConfig, CacheKey, CacheStrategy, CachedFetcher, PreloadContext, QueryCache,
    UpstreamError, UpstreamFetch,
};
use querycache::infra::telemetry;
use serde_json::{Value, json};
use serial_test::serial;

fn snapshotter() -> &'static Snapshotter {
    static SNAPSHOTTER: OnceLock<Snapshotter> = OnceLock::new();
    SNAPSHOTTER.get_or_init(|| {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        recorder
            .install()
            .expect("debug metrics recorder should install in this test process");
        telemetry::describe_metrics();
        snapshotter
    })
}

fn metric_names() -> HashSet<String> {
    snapshotter()
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect()
}

fn counter_total(name: &str) -> u64 {
    snapshotter()
        .snapshot()
        .into_vec()
        .into_iter()
        .filter(|(composite_key, _, _, _)| composite_key.key().name() == name)
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(count) => count,
            _ => 0,
        })
        .sum()
}

struct EchoUpstream;

#[async_trait]
impl UpstreamFetch for EchoUpstream {
    async fn fetch(&self, operation: &str, _variables: &Value) -> Result<Value, UpstreamError> {
        Ok(json!({ "operation": operation }))
    }
}

#[tokio::test]
#[serial]
async fn cache_paths_emit_expected_metric_keys() {
    snapshotter();

    let store = QueryCache::new(CacheConfig {
        max_size_bytes: 64,
        ..Default::default()
    });
    let small = Arc::new(json!("x".repeat(30)));
    store.set(CacheKey::from("A"), Arc::clone(&small), CacheStrategy::Short, None);
    store.set(CacheKey::from("B"), Arc::clone(&small), CacheStrategy::Short, None);
    assert!(store.get(&CacheKey::from("A")).is_some());
    store.set(CacheKey::from("C"), Arc::clone(&small), CacheStrategy::Short, None);
    assert!(store.get(&CacheKey::from("B")).is_none());
    store.set(
        CacheKey::from("D"),
        Arc::new(json!("y".repeat(100))),
        CacheStrategy::Short,
        None,
    );
    store.invalidate(&CacheKey::from("A"));

    let fetcher = CachedFetcher::new(CacheConfig::default(), Arc::new(EchoUpstream));
    let (first, second) = tokio::join!(
        fetcher.cached_fetch("GetMe", None, None, false),
        fetcher.cached_fetch("GetMe", None, None, false),
    );
    first.expect("first");
    second.expect("second");
    fetcher.preload(PreloadContext::General).await;

    let names = metric_names();
    let expected = [
        "querycache_hit_total",
        "querycache_miss_total",
        "querycache_evict_total",
        "querycache_set_total",
        "querycache_invalidate_total",
        "querycache_coalesced_total",
        "querycache_oversized_total",
        "querycache_resident_bytes",
        "querycache_preload_ms",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}

#[tokio::test]
#[serial]
async fn disabled_metrics_export_nothing_but_snapshot_counts() {
    snapshotter();
    let hits_before = counter_total("querycache_hit_total");
    let sets_before = counter_total("querycache_set_total");

    let config = CacheConfig {
        metrics_enabled: false,
        ..Default::default()
    };
    let fetcher = CachedFetcher::new(config, Arc::new(EchoUpstream));
    for _ in 0..3 {
        fetcher
            .cached_fetch("GetInstitutions", None, None, false)
            .await
            .expect("fetch");
    }

    assert_eq!(counter_total("querycache_hit_total"), hits_before);
    assert_eq!(counter_total("querycache_set_total"), sets_before);
    let snapshot = fetcher.metrics();
    assert_eq!(snapshot.hits, 2);
    assert_eq!(snapshot.misses, 1);
    assert_eq!(snapshot.sets, 1);
}
