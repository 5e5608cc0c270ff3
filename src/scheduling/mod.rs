//! Keyed call-rate control.
//!
//! # Responsibilities
//! - Throttle: leading edge, excess calls in a window are dropped
//! - Debounce: trailing edge, only the last call after a quiet period runs
//!
//! Both count suppressed calls in the shared [`GuardMetrics`].

pub mod debounce;
pub mod throttle;

use std::sync::Arc;
use std::time::Duration;

pub use debounce::Debounce;
pub use throttle::Throttle;

use crate::observability::GuardMetrics;
use crate::timer::TimerPort;

/// Throttle and debounce behind one handle.
pub struct Scheduler {
    throttle: Throttle,
    debounce: Debounce,
}

impl Scheduler {
    pub fn new(timer: Arc<dyn TimerPort>, metrics: Arc<GuardMetrics>) -> Self {
        Self {
            throttle: Throttle::new(Arc::clone(&metrics)),
            debounce: Debounce::new(timer, metrics),
        }
    }

    pub fn throttle<R>(&self, key: &str, interval: Duration, f: impl FnOnce() -> R) -> Option<R> {
        self.throttle.throttle(key, interval, f)
    }

    pub fn debounce(&self, key: &str, delay: Duration, f: impl FnOnce() + Send + 'static) {
        self.debounce.debounce(key, delay, f)
    }

    pub fn cancel_debounce(&self, key: &str) -> bool {
        self.debounce.cancel(key)
    }

    /// Forget all throttle windows and drop pending debounced calls.
    pub fn reset(&self) {
        self.throttle.reset();
        self.debounce.reset();
    }
}
