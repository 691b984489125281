//! Cache counters and the snapshot exposed to callers.
//!
//! Counters are always kept locally (for `MetricsSnapshot`). They are
//! mirrored to the process-wide `metrics` recorder only when exporting is
//! enabled.

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, gauge};
use serde::Serialize;

pub(crate) const METRIC_HIT_TOTAL: &str = "querycache_hit_total";
pub(crate) const METRIC_MISS_TOTAL: &str = "querycache_miss_total";
pub(crate) const METRIC_EVICT_TOTAL: &str = "querycache_evict_total";
pub(crate) const METRIC_SET_TOTAL: &str = "querycache_set_total";
pub(crate) const METRIC_INVALIDATE_TOTAL: &str = "querycache_invalidate_total";
pub(crate) const METRIC_COALESCED_TOTAL: &str = "querycache_coalesced_total";
pub(crate) const METRIC_OVERSIZED_TOTAL: &str = "querycache_oversized_total";
pub(crate) const METRIC_RESIDENT_BYTES: &str = "querycache_resident_bytes";
pub(crate) const METRIC_PRELOAD_MS: &str = "querycache_preload_ms";

/// Hit/miss/eviction counters for one cache instance.
#[derive(Debug)]
pub struct CacheMetrics {
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    sets: AtomicU64,
    invalidations: AtomicU64,
    coalesced: AtomicU64,
}

impl CacheMetrics {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn record_hit(&self) {
        self.bump(&self.hits, METRIC_HIT_TOTAL, 1);
    }

    pub fn record_miss(&self) {
        self.bump(&self.misses, METRIC_MISS_TOTAL, 1);
    }

    pub fn record_eviction(&self) {
        self.bump(&self.evictions, METRIC_EVICT_TOTAL, 1);
    }

    pub fn record_set(&self) {
        self.bump(&self.sets, METRIC_SET_TOTAL, 1);
    }

    pub fn record_invalidations(&self, count: usize) {
        if count > 0 {
            self.bump(&self.invalidations, METRIC_INVALIDATE_TOTAL, count as u64);
        }
    }

    pub fn record_coalesced(&self) {
        self.bump(&self.coalesced, METRIC_COALESCED_TOTAL, 1);
    }

    pub fn record_oversized(&self) {
        if self.enabled {
            counter!(METRIC_OVERSIZED_TOTAL).increment(1);
        }
    }

    pub fn record_resident_bytes(&self, bytes: usize) {
        if self.enabled {
            gauge!(METRIC_RESIDENT_BYTES).set(bytes as f64);
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn sets(&self) -> u64 {
        self.sets.load(Ordering::Relaxed)
    }

    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    /// `hits / (hits + misses)`, or 0.0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        hit_rate(self.hits(), self.misses())
    }

    /// Zero every counter.
    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.evictions,
            &self.sets,
            &self.invalidations,
            &self.coalesced,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn bump(&self, local: &AtomicU64, name: &'static str, by: u64) {
        local.fetch_add(by, Ordering::Relaxed);
        if self.enabled {
            counter!(name).increment(by);
        }
    }
}

fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// Point-in-time view of cache effectiveness and residency.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub cache_enabled: bool,
    #[serde(rename = "cache_hits")]
    pub hits: u64,
    #[serde(rename = "cache_misses")]
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    pub sets: u64,
    pub invalidations: u64,
    pub coalesced: u64,
    pub entry_count: usize,
    pub current_size_bytes: usize,
    pub max_size_bytes: usize,
}

impl MetricsSnapshot {
    pub(crate) fn capture(
        metrics: &CacheMetrics,
        cache_enabled: bool,
        entry_count: usize,
        current_size_bytes: usize,
        max_size_bytes: usize,
    ) -> Self {
        let hits = metrics.hits();
        let misses = metrics.misses();
        Self {
            cache_enabled,
            hits,
            misses,
            hit_rate: hit_rate(hits, misses),
            evictions: metrics.evictions(),
            sets: metrics.sets(),
            invalidations: metrics.invalidations(),
            coalesced: metrics.coalesced(),
            entry_count,
            current_size_bytes,
            max_size_bytes,
        }
    }

    /// Total lookups that reached the cache.
    pub fn total_requests(&self) -> u64 {
        self.hits + self.misses
    }
}
