//! Response cache with in-flight coalescing.
//!
//! # Responsibilities
//! - Serve live entries without touching the producer
//! - Share one in-flight producer among all callers of the same key
//! - Bound memory: evict the lowest hit count when full
//! - Never cache failures
//!
//! # Design Decisions
//! - Entries and in-flight computations sit behind one mutex so the
//!   "is anything pending?" check and the registration are atomic
//! - The lock is never held across an `.await`
//! - The shared future stores its own result and removes its pending slot,
//!   so a caller dropping out early cannot leave a stale computation behind
//! - A panicking producer still releases its slot; the panic reaches the
//!   callers already waiting, later callers start a fresh computation

use std::collections::HashMap;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;

use crate::cache::entry::CacheEntry;
use crate::observability::GuardMetrics;

type InFlight<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;

struct CacheState<V, E> {
    entries: HashMap<String, CacheEntry<V>>,
    pending: HashMap<String, InFlight<V, E>>,
}

impl<V, E> CacheState<V, E> {
    fn insert(&mut self, key: String, entry: CacheEntry<V>, capacity: usize) {
        if !self.entries.contains_key(&key) && self.entries.len() >= capacity {
            let coldest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.hit_count)
                .map(|(key, _)| key.clone());
            if let Some(evicted) = coldest {
                tracing::debug!(key = %evicted, "Evicting least-hit cache entry");
                self.entries.remove(&evicted);
            }
        }
        self.entries.insert(key, entry);
    }
}

/// Keyed TTL cache. Cloning shares the same storage.
pub struct ResponseCache<V, E> {
    state: Arc<Mutex<CacheState<V, E>>>,
    capacity: usize,
    metrics: Arc<GuardMetrics>,
}

impl<V, E> Clone for ResponseCache<V, E> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            capacity: self.capacity,
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<V, E> ResponseCache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new(capacity: usize, metrics: Arc<GuardMetrics>) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState {
                entries: HashMap::new(),
                pending: HashMap::new(),
            })),
            capacity: capacity.max(1),
            metrics,
        }
    }

    /// Return the live value for `key`, or compute it.
    ///
    /// While a computation for `key` is in flight, further callers await
    /// that computation instead of invoking their own `producer`.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, ttl: Duration, producer: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let in_flight = {
            let mut state = self.lock();
            let now = Instant::now();

            if let Some(entry) = state.entries.get_mut(key) {
                if entry.is_live(now) {
                    entry.hit_count += 1;
                    self.metrics.record_cache_hit();
                    return Ok(entry.value.clone());
                }
            }
            self.metrics.record_cache_miss();

            match state.pending.get(key) {
                Some(in_flight) => {
                    tracing::debug!(key = %key, "Joining in-flight computation");
                    in_flight.clone()
                }
                None => {
                    let in_flight = self.settle(key.to_string(), ttl, producer()).boxed().shared();
                    state.pending.insert(key.to_string(), in_flight.clone());
                    in_flight
                }
            }
        };

        in_flight.await
    }

    fn settle<Fut>(&self, key: String, ttl: Duration, work: Fut) -> impl Future<Output = Result<V, E>> + Send + 'static
    where
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let metrics = Arc::clone(&self.metrics);
        let capacity = self.capacity;

        async move {
            let started = Instant::now();
            let outcome = AssertUnwindSafe(work).catch_unwind().await;
            metrics.record_response_time(started.elapsed());

            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            state.pending.remove(&key);
            let result = match outcome {
                Ok(result) => result,
                Err(payload) => {
                    drop(state);
                    tracing::warn!(key = %key, "Producer panicked, pending slot released");
                    panic::resume_unwind(payload);
                }
            };
            if let Ok(value) = &result {
                let entry = CacheEntry::new(value.clone(), Instant::now() + ttl);
                state.insert(key, entry, capacity);
                metrics.record_cache_size(state.entries.len());
            }
            result
        }
    }

    /// Live value for `key` without producing or counting a hit.
    pub fn get(&self, key: &str) -> Option<V> {
        let state = self.lock();
        state
            .entries
            .get(key)
            .filter(|entry| entry.is_live(Instant::now()))
            .map(|entry| entry.value.clone())
    }

    /// Hits recorded for a stored entry.
    pub fn hit_count(&self, key: &str) -> Option<u64> {
        self.lock().entries.get(key).map(|entry| entry.hit_count)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Whether a computation for `key` is currently running.
    pub fn is_pending(&self, key: &str) -> bool {
        self.lock().pending.contains_key(key)
    }

    pub fn invalidate(&self, key: &str) -> bool {
        let mut state = self.lock();
        let removed = state.entries.remove(key).is_some();
        self.metrics.record_cache_size(state.entries.len());
        removed
    }

    /// Remove expired entries; returns how many were dropped.
    pub fn cleanup(&self) -> usize {
        let mut state = self.lock();
        let now = Instant::now();
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.is_live(now));
        let removed = before - state.entries.len();
        self.metrics.record_cache_size(state.entries.len());
        removed
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        self.metrics.record_cache_size(0);
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<V, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
