//! Query cache core.
//!
//! A byte-budgeted TTL cache in front of an upstream GraphQL source, with
//! single-flight coalescing of identical in-flight requests and a concurrent
//! preloader for common views:
//!
//! - [`QueryCache`]: LRU store with lazy TTL expiry and size accounting
//! - [`RequestDeduplicator`]: one upstream call per key at a time
//! - [`CachedFetcher`]: the read path tying both to an [`UpstreamFetch`]
//! - [`CachePreloader`]: warms the cache for a [`PreloadContext`]
//!
//! ## Configuration
//!
//! Cache behavior is controlled via the `[cache]` section of `querycache.toml`:
//!
//! ```toml
//! [cache]
//! enabled = true
//! deduplicate = true
//! max_size_bytes = 52428800
//! default_strategy = "short"
//!
//! [cache.ttl_overrides]
//! GetAccountTypeOptions = "never"
//! GetTransactionsList = 120
//! ```

mod clock;
mod config;
mod dedupe;
mod error;
mod fetcher;
mod keys;
mod lock;
mod metrics;
mod preloader;
mod store;
mod strategy;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CacheConfig;
pub use dedupe::{FetchResult, InFlightHandle, RequestDeduplicator};
pub use error::{CacheError, UpstreamError};
pub use fetcher::{CachedFetcher, UpstreamFetch};
pub use keys::{CacheKey, canonical_json, generate_key};
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use preloader::{CachePreloader, ParsePreloadContextError, PreloadContext};
pub use store::{CacheEntry, QueryCache, SetOutcome, approximate_size};
pub use strategy::{CacheStrategy, Expiry, ParseStrategyError, TtlDefaults};

pub(crate) use metrics::{
    METRIC_COALESCED_TOTAL, METRIC_EVICT_TOTAL, METRIC_HIT_TOTAL, METRIC_INVALIDATE_TOTAL,
    METRIC_MISS_TOTAL, METRIC_OVERSIZED_TOTAL, METRIC_PRELOAD_MS, METRIC_RESIDENT_BYTES,
    METRIC_SET_TOTAL,
};
