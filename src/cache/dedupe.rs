//! Single-flight coalescing of concurrent identical requests.
//!
//! The first caller for a key spawns the producer and registers a shared
//! handle to its outcome; later callers for the same key attach to that
//! handle instead of producing again. The registration is removed by a guard
//! owned by the spawned task, so it is gone before any waiter observes the
//! outcome, including when the task panics or is aborted.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde_json::Value;
use tracing::{debug, warn};

use super::error::CacheError;
use super::keys::CacheKey;

/// Outcome delivered to every caller attached to one fetch.
pub type FetchResult = Result<Arc<Value>, CacheError>;

/// Shared handle to an in-flight fetch.
pub type InFlightHandle = Shared<BoxFuture<'static, FetchResult>>;

struct Registration {
    generation: u64,
    handle: InFlightHandle,
}

type Registry = DashMap<CacheKey, Registration>;

/// Registry of in-flight fetches keyed by cache key.
pub struct RequestDeduplicator {
    in_flight: Arc<Registry>,
    next_generation: AtomicU64,
}

impl RequestDeduplicator {
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Handle to the fetch currently in flight for `key`, if any.
    pub fn join(&self, key: &CacheKey) -> Option<InFlightHandle> {
        self.in_flight
            .get(key)
            .map(|registration| registration.handle.clone())
    }

    /// Run `produce` at most once per key at a time.
    ///
    /// Returns the shared outcome and whether this caller attached to an
    /// existing fetch rather than starting one. Must be called from within a
    /// Tokio runtime.
    pub async fn dedupe<F, Fut>(&self, key: CacheKey, produce: F) -> (FetchResult, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchResult> + Send + 'static,
    {
        let (handle, coalesced) = self.register(key, produce);
        (handle.await, coalesced)
    }

    fn register<F, Fut>(&self, key: CacheKey, produce: F) -> (InFlightHandle, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchResult> + Send + 'static,
    {
        // The shard lock is held until the registration is inserted; the
        // spawned task's guard blocks on it, so it can never remove first.
        match self.in_flight.entry(key) {
            Entry::Occupied(occupied) => {
                debug!(key = %occupied.key(), "attaching to in-flight fetch");
                (occupied.get().handle.clone(), true)
            }
            Entry::Vacant(vacant) => {
                let key = vacant.key().clone();
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let guard = RegistrationGuard {
                    key: key.clone(),
                    generation,
                    registry: Arc::clone(&self.in_flight),
                };

                let fetch = produce();
                let task = tokio::spawn(async move {
                    let outcome = fetch.await;
                    drop(guard);
                    outcome
                });

                let cancelled_key = key.clone();
                let handle = async move {
                    match task.await {
                        Ok(outcome) => outcome,
                        Err(join_error) => {
                            warn!(
                                key = %cancelled_key,
                                error = %join_error,
                                "in-flight fetch did not complete"
                            );
                            Err(CacheError::Cancelled {
                                key: cancelled_key.into_string(),
                            })
                        }
                    }
                }
                .boxed()
                .shared();

                debug!(key = %key, generation, "registered in-flight fetch");
                vacant.insert(Registration {
                    generation,
                    handle: handle.clone(),
                });
                (handle, false)
            }
        }
    }

    /// Number of keys with an unresolved fetch.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        self.in_flight.contains_key(key)
    }
}

impl Default for RequestDeduplicator {
    fn default() -> Self {
        Self::new()
    }
}

/// Clears one registration when the fetch that owns it settles.
struct RegistrationGuard {
    key: CacheKey,
    generation: u64,
    registry: Arc<Registry>,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        let generation = self.generation;
        self.registry
            .remove_if(&self.key, |_, registration| {
                registration.generation == generation
            });
    }
}
