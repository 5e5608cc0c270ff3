//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Keep the in-process counters behind [`PerformanceMetrics`] snapshots
//! - Mirror every counter to the `metrics` facade so a host can export them
//!
//! # Metrics
//! - `pollguard_cache_hits_total` / `pollguard_cache_misses_total` (counter)
//! - `pollguard_cache_size` (gauge)
//! - `pollguard_throttled_calls_total` / `pollguard_debounced_calls_total` (counter)
//! - `pollguard_upstream_duration_seconds` (histogram): producer latency
//! - `pollguard_retries_total` (counter): by error kind
//! - `pollguard_breaker_transitions_total` (counter): by target state
//! - `pollguard_ticks_skipped_total` (counter): overlapping polls dropped
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - Response-time average over a bounded rolling window
//! - The exporter is opt-in; the host decides whether to call
//!   [`install_exporter`]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use serde::Serialize;

use crate::error::ErrorKind;
use crate::resilience::circuit_breaker::CircuitState;

/// Read-only snapshot of the core's performance counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_size: usize,
    pub throttled_calls: u64,
    pub debounced_calls: u64,
    pub average_response_time_ms: f64,
}

/// Shared counters, one instance per `PollGuard`.
#[derive(Debug)]
pub struct GuardMetrics {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_size: AtomicUsize,
    throttled_calls: AtomicU64,
    debounced_calls: AtomicU64,
    response_times: Mutex<VecDeque<Duration>>,
    window: usize,
}

impl GuardMetrics {
    /// `window` is the number of response times averaged.
    pub fn new(window: usize) -> Self {
        Self {
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            cache_size: AtomicUsize::new(0),
            throttled_calls: AtomicU64::new(0),
            debounced_calls: AtomicU64::new(0),
            response_times: Mutex::new(VecDeque::with_capacity(window)),
            window: window.max(1),
        }
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("pollguard_cache_hits_total").increment(1);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("pollguard_cache_misses_total").increment(1);
    }

    pub fn record_cache_size(&self, size: usize) {
        self.cache_size.store(size, Ordering::Relaxed);
        ::metrics::gauge!("pollguard_cache_size").set(size as f64);
    }

    pub fn record_throttled(&self) {
        self.throttled_calls.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("pollguard_throttled_calls_total").increment(1);
    }

    pub fn record_debounced(&self) {
        self.debounced_calls.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("pollguard_debounced_calls_total").increment(1);
    }

    /// Record how long one producer (upstream round) took.
    pub fn record_response_time(&self, elapsed: Duration) {
        {
            let mut samples = self
                .response_times
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if samples.len() == self.window {
                samples.pop_front();
            }
            samples.push_back(elapsed);
        }
        ::metrics::histogram!("pollguard_upstream_duration_seconds").record(elapsed.as_secs_f64());
    }

    pub fn snapshot(&self) -> PerformanceMetrics {
        let average_response_time_ms = {
            let samples = self
                .response_times
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if samples.is_empty() {
                0.0
            } else {
                let total: Duration = samples.iter().sum();
                total.as_micros() as f64 / 1000.0 / samples.len() as f64
            }
        };

        PerformanceMetrics {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_size: self.cache_size.load(Ordering::Relaxed),
            throttled_calls: self.throttled_calls.load(Ordering::Relaxed),
            debounced_calls: self.debounced_calls.load(Ordering::Relaxed),
            average_response_time_ms,
        }
    }
}

impl Default for GuardMetrics {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Record a scheduled retry.
pub fn record_retry(kind: ErrorKind) {
    ::metrics::counter!("pollguard_retries_total", "kind" => kind.to_string()).increment(1);
}

/// Record a circuit changing state.
pub fn record_breaker_transition(circuit: &str, to: CircuitState) {
    ::metrics::counter!(
        "pollguard_breaker_transitions_total",
        "circuit" => circuit.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

/// Record a polling tick skipped because the previous one was still running.
pub fn record_tick_skipped(consumer: &str) {
    ::metrics::counter!("pollguard_ticks_skipped_total", "consumer" => consumer.to_string())
        .increment(1);
}

/// Install the Prometheus exporter with its own HTTP listener on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn install_exporter(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Prometheus exporter listening");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let metrics = GuardMetrics::new(10);
        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_miss();
        metrics.record_throttled();
        metrics.record_debounced();
        metrics.record_cache_size(4);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cache_hits, 2);
        assert_eq!(snapshot.cache_misses, 1);
        assert_eq!(snapshot.cache_size, 4);
        assert_eq!(snapshot.throttled_calls, 1);
        assert_eq!(snapshot.debounced_calls, 1);
        assert_eq!(snapshot.average_response_time_ms, 0.0);
    }

    #[test]
    fn test_response_window_rolls() {
        let metrics = GuardMetrics::new(2);
        metrics.record_response_time(Duration::from_millis(1000));
        metrics.record_response_time(Duration::from_millis(10));
        metrics.record_response_time(Duration::from_millis(30));

        // The 1000ms sample fell out of the window.
        assert_eq!(metrics.snapshot().average_response_time_ms, 20.0);
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let json = serde_json::to_value(GuardMetrics::default().snapshot()).unwrap();
        assert!(json.get("cacheHits").is_some());
        assert!(json.get("averageResponseTimeMs").is_some());
    }
}
