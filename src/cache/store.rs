//! Byte-budgeted query result store.
//!
//! Entries live in an LRU map ordered by last access; TTL expiry is checked
//! lazily on read. The map and the resident-size counter share one mutex so
//! size accounting always moves together with the entries it describes.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use lru::LruCache;
use serde_json::Value;
use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};
use super::config::CacheConfig;
use super::keys::CacheKey;
use super::lock::mutex_lock;
use super::metrics::{CacheMetrics, MetricsSnapshot};
use super::strategy::{CacheStrategy, Expiry};

const SOURCE: &str = "cache::store";

/// One cached result.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Arc<Value>,
    pub size_bytes: usize,
    pub created_at: Instant,
    pub last_accessed_at: Instant,
    /// `None` never expires.
    pub expires_at: Option<Instant>,
    pub strategy: CacheStrategy,
}

impl CacheEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

/// Result of [`QueryCache::set`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetOutcome {
    /// Stored after evicting `evicted` older entries.
    Stored { evicted: Vec<CacheKey> },
    /// Larger than the whole budget; not cached.
    Oversized { size_bytes: usize },
}

impl SetOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, Self::Stored { .. })
    }
}

struct StoreState {
    entries: LruCache<CacheKey, CacheEntry>,
    current_size_bytes: usize,
}

impl StoreState {
    fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.entries.pop(key)?;
        self.current_size_bytes -= entry.size_bytes;
        Some(entry)
    }

    fn remove_matching(&mut self, mut predicate: impl FnMut(&CacheKey) -> bool) -> usize {
        let doomed: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(key, _)| predicate(*key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            self.remove(key);
        }
        doomed.len()
    }
}

/// In-memory query cache with a fixed byte budget.
pub struct QueryCache {
    config: CacheConfig,
    state: Mutex<StoreState>,
    metrics: CacheMetrics,
    clock: Arc<dyn Clock>,
}

impl QueryCache {
    /// Create a cache driven by the system clock.
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let metrics = CacheMetrics::new(config.metrics_enabled);
        Self {
            config,
            state: Mutex::new(StoreState {
                entries: LruCache::unbounded(),
                current_size_bytes: 0,
            }),
            metrics,
            clock,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn max_size_bytes(&self) -> usize {
        self.config.max_size_bytes
    }

    pub(crate) fn counters(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// Look up a fresh entry.
    ///
    /// An expired entry is removed and reported as a miss.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<Value>> {
        let now = self.clock.now();
        let mut state = mutex_lock(&self.state, SOURCE, "get");

        let expired = match state.entries.peek(key) {
            None => {
                self.metrics.record_miss();
                debug!(key = %key, outcome = "miss", "query cache lookup");
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };

        if expired {
            state.remove(key);
            self.metrics.record_miss();
            self.metrics.record_resident_bytes(state.current_size_bytes);
            debug!(key = %key, outcome = "expired", "query cache lookup");
            return None;
        }

        let entry = state.entries.get_mut(key)?;
        entry.last_accessed_at = now;
        self.metrics.record_hit();
        debug!(key = %key, outcome = "hit", "query cache lookup");
        Some(Arc::clone(&entry.value))
    }

    /// Store `value` under `key`.
    ///
    /// TTL precedence: `ttl_override`, then `strategy`. Values larger than the
    /// whole budget are not cached; any previous entry for the key is dropped
    /// since it is now stale.
    pub fn set(
        &self,
        key: CacheKey,
        value: Arc<Value>,
        strategy: CacheStrategy,
        ttl_override: Option<Expiry>,
    ) -> SetOutcome {
        let size_bytes = approximate_size(&value);
        let expiry = ttl_override.unwrap_or_else(|| strategy.resolve(&self.config.ttl_defaults()));
        let max_size_bytes = self.config.max_size_bytes;

        let now = self.clock.now();
        let mut state = mutex_lock(&self.state, SOURCE, "set");

        // Overwrites release the old size before the budget check.
        let replaced = state.remove(&key).is_some();

        if size_bytes > max_size_bytes {
            self.metrics.record_oversized();
            if replaced {
                self.metrics.record_invalidations(1);
            }
            self.metrics.record_resident_bytes(state.current_size_bytes);
            warn!(
                key = %key,
                size_bytes,
                max_size_bytes,
                "value exceeds cache budget; not cached"
            );
            return SetOutcome::Oversized { size_bytes };
        }

        let mut evicted = Vec::new();
        while state.current_size_bytes + size_bytes > max_size_bytes {
            let Some((victim, entry)) = state.entries.pop_lru() else {
                break;
            };
            state.current_size_bytes -= entry.size_bytes;
            self.metrics.record_eviction();
            debug!(
                key = %victim,
                size_bytes = entry.size_bytes,
                "evicted least recently used entry"
            );
            evicted.push(victim);
        }

        let expires_at = match expiry {
            Expiry::Never => None,
            Expiry::After(ttl) => now.checked_add(ttl),
        };
        state.entries.put(
            key,
            CacheEntry {
                value,
                size_bytes,
                created_at: now,
                last_accessed_at: now,
                expires_at,
                strategy,
            },
        );
        state.current_size_bytes += size_bytes;
        self.metrics.record_set();
        self.metrics.record_resident_bytes(state.current_size_bytes);

        SetOutcome::Stored { evicted }
    }

    /// Remove one entry. Returns whether it was present.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let mut state = mutex_lock(&self.state, SOURCE, "invalidate");
        let removed = state.remove(key).is_some();
        if removed {
            self.metrics.record_invalidations(1);
            self.metrics.record_resident_bytes(state.current_size_bytes);
        }
        removed
    }

    /// Remove every entry whose key contains `pattern`.
    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        let mut state = mutex_lock(&self.state, SOURCE, "invalidate_pattern");
        let removed = state.remove_matching(|key| key.as_str().contains(pattern));
        self.metrics.record_invalidations(removed);
        self.metrics.record_resident_bytes(state.current_size_bytes);
        debug!(pattern, removed, "invalidated entries by pattern");
        removed
    }

    /// Remove every entry generated from `operation`.
    pub fn invalidate_by_operation(&self, operation: &str) -> usize {
        let mut state = mutex_lock(&self.state, SOURCE, "invalidate_by_operation");
        let removed = state.remove_matching(|key| key.operation() == operation);
        self.metrics.record_invalidations(removed);
        self.metrics.record_resident_bytes(state.current_size_bytes);
        debug!(operation, removed, "invalidated entries by operation");
        removed
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        let mut state = mutex_lock(&self.state, SOURCE, "clear");
        let removed = state.entries.len();
        state.entries.clear();
        state.current_size_bytes = 0;
        self.metrics.record_invalidations(removed);
        self.metrics.record_resident_bytes(0);
    }

    /// True if `key` is resident, expired or not. Does not touch recency.
    pub fn contains(&self, key: &CacheKey) -> bool {
        mutex_lock(&self.state, SOURCE, "contains").entries.contains(key)
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.state, SOURCE, "len").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn current_size_bytes(&self) -> usize {
        mutex_lock(&self.state, SOURCE, "current_size_bytes").current_size_bytes
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        let (entry_count, current_size_bytes) = {
            let state = mutex_lock(&self.state, SOURCE, "metrics");
            (state.entries.len(), state.current_size_bytes)
        };
        MetricsSnapshot::capture(
            &self.metrics,
            self.config.enabled,
            entry_count,
            current_size_bytes,
            self.config.max_size_bytes,
        )
    }
}

/// Serialized JSON length of `value`, measured without buffering.
pub fn approximate_size(value: &Value) -> usize {
    let mut counter = ByteCounter(0);
    match serde_json::to_writer(&mut counter, value) {
        Ok(()) => counter.0,
        Err(_) => usize::MAX,
    }
}

struct ByteCounter(usize);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
