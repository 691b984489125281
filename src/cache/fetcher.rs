//! The cached, coalesced read path used by every caller.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use super::config::CacheConfig;
use super::dedupe::{FetchResult, RequestDeduplicator};
use super::error::{CacheError, UpstreamError};
use super::keys::{CacheKey, generate_key};
use super::metrics::MetricsSnapshot;
use super::preloader::{CachePreloader, PreloadContext};
use super::store::QueryCache;
use super::strategy::CacheStrategy;

/// Source of fresh results, supplied by the transport layer.
#[async_trait]
pub trait UpstreamFetch: Send + Sync + 'static {
    async fn fetch(&self, operation: &str, variables: &Value) -> Result<Value, UpstreamError>;
}

/// Cache, deduplicator and upstream wired together.
///
/// Cloning is cheap; clones share the same cache state.
#[derive(Clone)]
pub struct CachedFetcher {
    cache: Arc<QueryCache>,
    dedupe: Arc<RequestDeduplicator>,
    upstream: Arc<dyn UpstreamFetch>,
}

impl CachedFetcher {
    pub fn new(config: CacheConfig, upstream: Arc<dyn UpstreamFetch>) -> Self {
        Self::with_cache(Arc::new(QueryCache::new(config)), upstream)
    }

    /// Wrap an existing cache, e.g. one built with a manual clock.
    pub fn with_cache(cache: Arc<QueryCache>, upstream: Arc<dyn UpstreamFetch>) -> Self {
        Self {
            cache,
            dedupe: Arc::new(RequestDeduplicator::new()),
            upstream,
        }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn deduplicator(&self) -> &RequestDeduplicator {
        &self.dedupe
    }

    /// Resolve `operation` with `variables`, from cache when possible.
    ///
    /// A fetch already in flight for the same key is joined even when
    /// `force_refresh` is set, so at most one upstream call per key runs at a
    /// time. `strategy` falls back to the configured default.
    #[instrument(level = "debug", skip(self, variables))]
    pub async fn cached_fetch(
        &self,
        operation: &str,
        variables: Option<&Value>,
        strategy: Option<CacheStrategy>,
        force_refresh: bool,
    ) -> Result<Arc<Value>, CacheError> {
        let key = generate_key(operation, variables)?;
        let config = self.cache.config();
        let strategy = strategy.unwrap_or(config.default_strategy);

        if config.deduplicate
            && let Some(in_flight) = self.dedupe.join(&key)
        {
            self.cache.counters().record_coalesced();
            debug!(key = %key, "joined in-flight fetch");
            return in_flight.await;
        }

        if config.enabled
            && !force_refresh
            && let Some(value) = self.cache.get(&key)
        {
            return Ok(value);
        }

        let variables = variables
            .filter(|value| !value.is_null())
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        let fetch = self.fetch_and_store(key.clone(), operation.to_string(), variables, strategy);

        if !config.deduplicate {
            return fetch.await;
        }

        let (outcome, coalesced) = self.dedupe.dedupe(key, move || fetch).await;
        if coalesced {
            self.cache.counters().record_coalesced();
        }
        outcome
    }

    /// One upstream call; a success is written to the cache before the
    /// in-flight registration is released.
    fn fetch_and_store(
        &self,
        key: CacheKey,
        operation: String,
        variables: Value,
        strategy: CacheStrategy,
    ) -> impl Future<Output = FetchResult> + Send + 'static {
        let upstream = Arc::clone(&self.upstream);
        let cache = Arc::clone(&self.cache);

        async move {
            let value = match upstream.fetch(&operation, &variables).await {
                Ok(value) => Arc::new(value),
                Err(error) => {
                    debug!(key = %key, error = %error, "upstream fetch failed; nothing cached");
                    return Err(CacheError::Upstream(error));
                }
            };

            let config = cache.config();
            if config.enabled {
                let ttl_override = config.ttl_override_for(&operation);
                cache.set(key, Arc::clone(&value), strategy, ttl_override);
            }
            Ok(value)
        }
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.cache.invalidate(key)
    }

    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        self.cache.invalidate_pattern(pattern)
    }

    pub fn invalidate_by_operation(&self, operation: &str) -> usize {
        self.cache.invalidate_by_operation(operation)
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.cache.metrics()
    }

    /// Warm the cache for `context`. Never fails; see [`CachePreloader`].
    pub async fn preload(&self, context: PreloadContext) -> BTreeMap<String, bool> {
        CachePreloader::new(self.clone()).preload(context).await
    }
}
