//! Keyed leading-edge throttle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::observability::GuardMetrics;

/// Runs at most one call per key per window. Excess calls are dropped.
pub struct Throttle {
    windows: Mutex<HashMap<String, Instant>>,
    metrics: Arc<GuardMetrics>,
}

impl Throttle {
    pub fn new(metrics: Arc<GuardMetrics>) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    /// Open a window for `key` if none is open. Returns false when the call
    /// should be dropped.
    fn admit(&self, key: &str, interval: Duration) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        match windows.get(key) {
            Some(opened) if now.duration_since(*opened) < interval => false,
            _ => {
                windows.insert(key.to_string(), now);
                true
            }
        }
    }

    /// Run `f` unless a window for `key` opened less than `interval` ago.
    pub fn throttle<R>(&self, key: &str, interval: Duration, f: impl FnOnce() -> R) -> Option<R> {
        if self.admit(key, interval) {
            Some(f())
        } else {
            tracing::debug!(key = %key, "Throttled call dropped");
            self.metrics.record_throttled();
            None
        }
    }

    pub fn reset(&self) {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}
