//! `PollGuard`: the assembled core.
//!
//! # Responsibilities
//! - Own one of each subsystem, built from a [`GuardConfig`]
//! - Compose cache, retries and circuit breaker around an upstream call
//! - Register polling consumers and release them
//! - Expire cache entries in the background until shutdown
//!
//! # Data Flow
//! ```text
//! fetch(key, ttl, op)
//!     → ResponseCache::get_or_compute(key)          (hit or coalesce)
//!         → RetryExecutor::execute(key)             (classify, back off)
//!             → CircuitBreaker::guard(key)          (fail fast when open)
//!                 → op()
//! ```
//!
//! # Design Decisions
//! - Cheap to clone; every clone shares the same state
//! - The cache key doubles as the circuit name and the retry key

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time;

use crate::cache::ResponseCache;
use crate::config::GuardConfig;
use crate::error::{GuardError, GuardResult, RawError};
use crate::observability::{GuardMetrics, PerformanceMetrics};
use crate::polling::Poller;
use crate::resilience::{CircuitBreaker, ErrorClassifier, RetryExecutor, RetryPolicy};
use crate::scheduling::Scheduler;
use crate::state::{ActionState, ActionStateStore};
use crate::timer::{TimerHandle, TimerPort};

pub struct PollGuard<V> {
    cache: ResponseCache<V, GuardError>,
    breakers: Arc<CircuitBreaker>,
    executor: Arc<RetryExecutor>,
    scheduler: Arc<Scheduler>,
    poller: Poller<V>,
    metrics: Arc<GuardMetrics>,
    policy: RetryPolicy,
    default_ttl: Duration,
    cleanup_interval: Duration,
}

impl<V> Clone for PollGuard<V> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            breakers: Arc::clone(&self.breakers),
            executor: Arc::clone(&self.executor),
            scheduler: Arc::clone(&self.scheduler),
            poller: self.poller.clone(),
            metrics: Arc::clone(&self.metrics),
            policy: self.policy,
            default_ttl: self.default_ttl,
            cleanup_interval: self.cleanup_interval,
        }
    }
}

impl<V> PollGuard<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(config: &GuardConfig, timer: Arc<dyn TimerPort>) -> Self {
        Self::with_classifier(config, timer, ErrorClassifier::new())
    }

    /// Like [`PollGuard::new`] with custom user-facing error messages.
    pub fn with_classifier(
        config: &GuardConfig,
        timer: Arc<dyn TimerPort>,
        classifier: ErrorClassifier,
    ) -> Self {
        let metrics = Arc::new(GuardMetrics::new(config.cache.response_window));
        let states = Arc::new(ActionStateStore::new(Arc::clone(&timer)));

        Self {
            cache: ResponseCache::new(config.cache.max_entries, Arc::clone(&metrics)),
            breakers: Arc::new(CircuitBreaker::new(config.circuit_breaker.clone())),
            executor: Arc::new(RetryExecutor::new(classifier)),
            scheduler: Arc::new(Scheduler::new(Arc::clone(&timer), Arc::clone(&metrics))),
            poller: Poller::new(states, timer),
            metrics,
            policy: RetryPolicy::from(&config.retries),
            default_ttl: config.cache.default_ttl(),
            cleanup_interval: config.cache.cleanup_interval(),
        }
    }

    /// Fetch through cache, retries and circuit breaker.
    ///
    /// `op` may run several times (retries) or not at all (cache hit, another
    /// caller already fetching, open circuit).
    pub async fn fetch<F, Fut, E>(&self, key: &str, ttl: Duration, op: F) -> GuardResult<V>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Into<RawError> + Send + 'static,
    {
        let breakers = Arc::clone(&self.breakers);
        let executor = Arc::clone(&self.executor);
        let policy = self.policy;
        let circuit = key.to_string();

        self.cache
            .get_or_compute(key, ttl, move || async move {
                executor
                    .execute(&circuit, policy, || breakers.guard(&circuit, &op))
                    .await
            })
            .await
    }

    /// Poll `key` for `consumer` every `interval`, caching for `ttl`.
    pub fn poll<F, Fut, E>(
        &self,
        consumer: &str,
        key: &str,
        interval: Duration,
        ttl: Duration,
        op: F,
    ) -> TimerHandle
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Into<RawError> + Send + 'static,
    {
        let guard = self.clone();
        let key = key.to_string();
        let op = Arc::new(op);

        self.poller.start(consumer, interval, move || {
            let guard = guard.clone();
            let key = key.clone();
            let op = Arc::clone(&op);
            async move { guard.fetch(&key, ttl, move || (*op)()).await }
        })
    }

    /// Stop polling for `consumer`, keeping its last state.
    pub fn stop(&self, consumer: &str) {
        self.poller.stop(consumer);
    }

    /// Release `consumer`: cancel its timer and drop its state.
    pub fn detach(&self, consumer: &str) -> bool {
        self.poller.detach(consumer)
    }

    /// Drop everything kept for `key`: cached value, circuit and retry count.
    pub fn release_key(&self, key: &str) {
        self.cache.invalidate(key);
        self.breakers.remove(key);
        self.executor.forget(key);
        tracing::debug!(key = %key, "Key released");
    }

    pub fn state(&self, consumer: &str) -> Option<ActionState<V>> {
        self.poller.states().get(consumer)
    }

    /// Detach every consumer and drop pending debounced calls.
    pub fn shutdown(&self) {
        let consumers = self.poller.states().len();
        self.poller.states().clear_all();
        self.scheduler.reset();
        tracing::info!(consumers, "Released all consumers");
    }

    /// Expire cache entries every `cleanup_interval` until `shutdown` fires.
    pub fn spawn_maintenance(&self, mut shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        let cache = self.cache.clone();
        let period = self.cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = cache.cleanup();
                        if removed > 0 {
                            tracing::debug!(removed, remaining = cache.len(), "Expired cache entries removed");
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::info!("Cache maintenance received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        })
    }

    pub fn metrics(&self) -> PerformanceMetrics {
        self.metrics.snapshot()
    }

    pub fn cache(&self) -> &ResponseCache<V, GuardError> {
        &self.cache
    }

    pub fn breakers(&self) -> &CircuitBreaker {
        &self.breakers
    }

    pub fn executor(&self) -> &RetryExecutor {
        &self.executor
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn states(&self) -> &ActionStateStore<V> {
        self.poller.states()
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }
}
