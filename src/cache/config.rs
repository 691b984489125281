//! Cache configuration.
//!
//! Controls the query cache, request deduplication and TTL policy via the
//! `[cache]` section of `querycache.toml`.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use super::strategy::{CacheStrategy, Expiry, TtlDefaults};

// Default values for cache configuration
const DEFAULT_MAX_SIZE_BYTES: usize = 50 * 1024 * 1024;
const DEFAULT_SHORT_TTL_SECS: u64 = 300;
const DEFAULT_LONG_TTL_SECS: u64 = 3600;

/// Cache configuration from `querycache.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Serve and store results through the query cache.
    pub enabled: bool,
    /// Coalesce concurrent identical requests onto one upstream call.
    pub deduplicate: bool,
    /// Record hit/miss/eviction counters.
    pub metrics_enabled: bool,
    /// Resident size budget across all entries.
    pub max_size_bytes: usize,
    /// Strategy used when a caller does not name one.
    pub default_strategy: CacheStrategy,
    /// TTL backing the `short` strategy.
    pub short_ttl_secs: u64,
    /// TTL backing the `long` strategy.
    pub long_ttl_secs: u64,
    /// Operation name → TTL override (`seconds` or `"never"`).
    pub ttl_overrides: HashMap<String, Expiry>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            deduplicate: true,
            metrics_enabled: true,
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            default_strategy: CacheStrategy::Short,
            short_ttl_secs: DEFAULT_SHORT_TTL_SECS,
            long_ttl_secs: DEFAULT_LONG_TTL_SECS,
            ttl_overrides: HashMap::new(),
        }
    }
}

impl CacheConfig {
    /// Budget expressed in MiB, as the client options are usually written.
    pub fn with_max_size_mb(mut self, megabytes: usize) -> Self {
        self.max_size_bytes = megabytes.saturating_mul(1024 * 1024);
        self
    }

    pub fn with_ttl_override(mut self, operation: impl Into<String>, expiry: Expiry) -> Self {
        self.ttl_overrides.insert(operation.into(), expiry);
        self
    }

    /// Concrete TTLs for the `long`/`short` strategies.
    pub fn ttl_defaults(&self) -> TtlDefaults {
        TtlDefaults {
            short: Duration::from_secs(self.short_ttl_secs),
            long: Duration::from_secs(self.long_ttl_secs),
        }
    }

    /// Configured override for `operation`, if any.
    pub fn ttl_override_for(&self, operation: &str) -> Option<Expiry> {
        self.ttl_overrides.get(operation).copied()
    }
}
