//! Circuit breaker for upstream protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: upstream assumed down, calls fail fast
//! - Half-Open: testing if upstream recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures >= failure_threshold
//! Open → Half-Open: first call at or after next_attempt_at (lazy, no timer)
//! Half-Open → Closed: probe succeeds
//! Half-Open → Open: probe fails, or a call arrives with the probe budget spent
//! ```
//!
//! # Design Decisions
//! - One record per circuit name (not global)
//! - Fail fast in Open state; the guarded operation is never invoked
//! - Records live until `remove` is called

use std::fmt;
use std::future::Future;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::error::{AttemptError, BreakerOpen, RawError};
use crate::observability::metrics;

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone)]
struct CircuitRecord {
    state: CircuitState,
    consecutive_failures: u32,
    next_attempt_at: Instant,
    half_open_probes_used: u32,
}

impl CircuitRecord {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            next_attempt_at: Instant::now(),
            half_open_probes_used: 0,
        }
    }
}

/// Point-in-time view of one circuit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub half_open_probes_used: u32,
    /// Time left before an open circuit admits a probe.
    pub retry_in: Option<Duration>,
}

/// Registry of circuits keyed by operation name.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    circuits: DashMap<String, CircuitRecord>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: DashMap::new(),
        }
    }

    /// Ask permission to call the operation behind `name`.
    pub fn try_acquire(&self, name: &str) -> Result<(), BreakerOpen> {
        let now = Instant::now();
        let mut record = self
            .circuits
            .entry(name.to_string())
            .or_insert_with(CircuitRecord::new);

        let state = record.state;
        match state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open if now < record.next_attempt_at => {
                Err(self.rejection(name, &record, now))
            }
            CircuitState::Open => {
                tracing::info!(circuit = %name, "Circuit half-open, admitting probe");
                metrics::record_breaker_transition(name, CircuitState::HalfOpen);
                record.state = CircuitState::HalfOpen;
                record.half_open_probes_used = 1;
                Ok(())
            }
            CircuitState::HalfOpen if record.half_open_probes_used < self.config.half_open_requests => {
                record.half_open_probes_used += 1;
                Ok(())
            }
            CircuitState::HalfOpen => {
                self.trip(name, &mut *record, now);
                Err(self.rejection(name, &record, now))
            }
        }
    }

    /// Report a successful call.
    pub fn record_success(&self, name: &str) {
        if let Some(mut record) = self.circuits.get_mut(name) {
            if record.state != CircuitState::Closed {
                tracing::info!(circuit = %name, "Circuit closed after successful probe");
                metrics::record_breaker_transition(name, CircuitState::Closed);
            }
            record.state = CircuitState::Closed;
            record.consecutive_failures = 0;
            record.half_open_probes_used = 0;
        }
    }

    /// Report a failed call.
    pub fn record_failure(&self, name: &str) {
        let now = Instant::now();
        let mut record = self
            .circuits
            .entry(name.to_string())
            .or_insert_with(CircuitRecord::new);

        record.consecutive_failures = record.consecutive_failures.saturating_add(1);
        let state = record.state;
        match state {
            CircuitState::Closed if record.consecutive_failures >= self.config.failure_threshold => {
                self.trip(name, &mut *record, now);
            }
            CircuitState::Closed => {}
            CircuitState::HalfOpen => self.trip(name, &mut *record, now),
            // Late result of a call admitted before the trip; the reset
            // timeout keeps running from the original trip.
            CircuitState::Open => {}
        }
    }

    /// Run `operation` through the circuit named `name`.
    ///
    /// Breaker-open is reported as [`AttemptError::BreakerOpen`] without
    /// invoking `operation`; operation failures come back unclassified.
    pub async fn guard<T, E, F, Fut>(&self, name: &str, operation: F) -> Result<T, AttemptError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<RawError>,
    {
        self.try_acquire(name)?;

        match operation().await {
            Ok(value) => {
                self.record_success(name);
                Ok(value)
            }
            Err(err) => {
                self.record_failure(name);
                Err(AttemptError::Failed(err.into()))
            }
        }
    }

    /// Current state; unknown circuits are closed.
    pub fn state(&self, name: &str) -> CircuitState {
        self.circuits
            .get(name)
            .map(|record| record.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn snapshot(&self, name: &str) -> Option<CircuitSnapshot> {
        let now = Instant::now();
        self.circuits.get(name).map(|record| snapshot_of(&record, now))
    }

    /// Snapshot of every known circuit, sorted by name.
    pub fn snapshots(&self) -> Vec<(String, CircuitSnapshot)> {
        let now = Instant::now();
        let mut all: Vec<_> = self
            .circuits
            .iter()
            .map(|entry| (entry.key().clone(), snapshot_of(entry.value(), now)))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Force a circuit back to closed.
    pub fn reset(&self, name: &str) {
        if let Some(mut record) = self.circuits.get_mut(name) {
            *record = CircuitRecord::new();
        }
    }

    /// Forget a circuit entirely.
    pub fn remove(&self, name: &str) -> bool {
        self.circuits.remove(name).is_some()
    }

    fn trip(&self, name: &str, record: &mut CircuitRecord, now: Instant) {
        if record.state != CircuitState::Open {
            tracing::warn!(
                circuit = %name,
                failures = record.consecutive_failures,
                reset_timeout_ms = self.config.reset_timeout_ms,
                "Circuit opened"
            );
            metrics::record_breaker_transition(name, CircuitState::Open);
        }
        record.state = CircuitState::Open;
        record.next_attempt_at = now + self.config.reset_timeout();
        record.half_open_probes_used = 0;
    }

    fn rejection(&self, name: &str, record: &CircuitRecord, now: Instant) -> BreakerOpen {
        BreakerOpen {
            circuit: name.to_string(),
            consecutive_failures: record.consecutive_failures,
            retry_in: record.next_attempt_at.saturating_duration_since(now),
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

fn snapshot_of(record: &CircuitRecord, now: Instant) -> CircuitSnapshot {
    CircuitSnapshot {
        state: record.state,
        consecutive_failures: record.consecutive_failures,
        half_open_probes_used: record.half_open_probes_used,
        retry_in: (record.state == CircuitState::Open)
            .then(|| record.next_attempt_at.saturating_duration_since(now)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UpstreamError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(threshold: u32, reset_ms: u64, probes: u32) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_timeout_ms: reset_ms,
            half_open_requests: probes,
        })
    }

    async fn fail(cb: &CircuitBreaker, calls: &AtomicU32) -> Result<(), AttemptError> {
        cb.guard("ci", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(UpstreamError::new("boom").with_status(500))
        })
        .await
    }

    async fn succeed(cb: &CircuitBreaker, calls: &AtomicU32) -> Result<(), AttemptError> {
        cb.guard("ci", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<(), UpstreamError>(())
        })
        .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_and_fails_fast() {
        let cb = breaker(3, 1_000, 1);
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            assert!(matches!(fail(&cb, &calls).await, Err(AttemptError::Failed(_))));
        }
        assert_eq!(cb.state("ci"), CircuitState::Open);

        let result = succeed(&cb, &calls).await;
        match result {
            Err(AttemptError::BreakerOpen(open)) => {
                assert_eq!(open.circuit, "ci");
                assert_eq!(open.consecutive_failures, 3);
                assert!(open.retry_in <= Duration::from_secs(1));
            }
            other => panic!("expected breaker open, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3, "open circuit must not invoke");
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_failure_keeps_reset_deadline() {
        let cb = breaker(1, 1_000, 1);
        cb.record_failure("ci");
        assert_eq!(cb.state("ci"), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(600)).await;
        cb.record_failure("ci");
        assert_eq!(cb.snapshot("ci").unwrap().consecutive_failures, 2);

        tokio::time::advance(Duration::from_millis(400)).await;
        assert!(cb.try_acquire("ci").is_ok());
        assert_eq!(cb.state("ci"), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_success_closes() {
        let cb = breaker(2, 1_000, 1);
        let calls = AtomicU32::new(0);
        let _ = fail(&cb, &calls).await;
        let _ = fail(&cb, &calls).await;
        assert_eq!(cb.state("ci"), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(1_000)).await;

        assert!(succeed(&cb, &calls).await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(cb.state("ci"), CircuitState::Closed);
        assert_eq!(cb.snapshot("ci").unwrap().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_failure_reopens() {
        let cb = breaker(2, 1_000, 1);
        let calls = AtomicU32::new(0);
        let _ = fail(&cb, &calls).await;
        let _ = fail(&cb, &calls).await;

        tokio::time::advance(Duration::from_millis(1_500)).await;
        assert!(matches!(fail(&cb, &calls).await, Err(AttemptError::Failed(_))));
        assert_eq!(cb.state("ci"), CircuitState::Open);

        // Fresh timeout counted from the failed probe.
        let snapshot = cb.snapshot("ci").unwrap();
        assert_eq!(snapshot.retry_in, Some(Duration::from_millis(1_000)));
        assert!(matches!(
            succeed(&cb, &calls).await,
            Err(AttemptError::BreakerOpen(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_extra_call_beyond_probe_budget_reopens() {
        let cb = breaker(1, 1_000, 1);
        let calls = AtomicU32::new(0);
        let _ = fail(&cb, &calls).await;
        tokio::time::advance(Duration::from_secs(1)).await;

        assert!(cb.try_acquire("ci").is_ok());
        assert_eq!(cb.state("ci"), CircuitState::HalfOpen);
        assert!(cb.try_acquire("ci").is_err());
        assert_eq!(cb.state("ci"), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_multiple_probes_allowed() {
        let cb = breaker(1, 100, 2);
        let calls = AtomicU32::new(0);
        let _ = fail(&cb, &calls).await;
        tokio::time::advance(Duration::from_millis(100)).await;

        assert!(cb.try_acquire("ci").is_ok());
        assert!(cb.try_acquire("ci").is_ok());
        assert!(cb.try_acquire("ci").is_err());
    }

    #[tokio::test]
    async fn test_circuits_are_independent() {
        let cb = breaker(1, 60_000, 1);
        cb.record_failure("builds");
        assert_eq!(cb.state("builds"), CircuitState::Open);
        assert_eq!(cb.state("releases"), CircuitState::Closed);
        assert!(cb.try_acquire("releases").is_ok());
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let cb = breaker(3, 60_000, 1);
        cb.record_failure("prs");
        cb.record_failure("prs");
        cb.record_success("prs");
        cb.record_failure("prs");
        cb.record_failure("prs");
        assert_eq!(cb.state("prs"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_reset_and_remove() {
        let cb = breaker(1, 60_000, 1);
        cb.record_failure("wi");
        cb.reset("wi");
        assert_eq!(cb.state("wi"), CircuitState::Closed);

        assert!(cb.remove("wi"));
        assert!(!cb.remove("wi"));
        assert!(cb.snapshots().is_empty());
    }
}
