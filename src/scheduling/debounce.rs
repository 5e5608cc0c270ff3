//! Keyed trailing-edge debounce on top of [`TimerPort`].
//!
//! Each call replaces the pending action for its key and restarts the timer.
//! Only the most recent action runs, once the key has been quiet for `delay`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;

use crate::observability::GuardMetrics;
use crate::timer::{Callback, TimerHandle, TimerPort};

struct Pending {
    seq: u64,
    handle: Option<TimerHandle>,
    action: Mutex<Callback>,
}

pub struct Debounce {
    timer: Arc<dyn TimerPort>,
    pending: Arc<DashMap<String, Pending>>,
    next_seq: AtomicU64,
    metrics: Arc<GuardMetrics>,
}

impl Debounce {
    pub fn new(timer: Arc<dyn TimerPort>, metrics: Arc<GuardMetrics>) -> Self {
        Self {
            timer,
            pending: Arc::new(DashMap::new()),
            next_seq: AtomicU64::new(0),
            metrics,
        }
    }

    /// Run `action` after `delay` unless another call for `key` arrives first.
    pub fn debounce(&self, key: &str, delay: Duration, action: impl FnOnce() + Send + 'static) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);

        // The action lives in the map so whichever side runs first (timer or
        // handle bookkeeping below) sees a consistent record.
        let superseded = self.pending.insert(
            key.to_string(),
            Pending {
                seq,
                handle: None,
                action: Mutex::new(Box::new(action)),
            },
        );
        if let Some(previous) = superseded {
            if let Some(handle) = previous.handle {
                self.timer.cancel(handle);
            }
            self.metrics.record_debounced();
            tracing::debug!(key = %key, "Debounced call superseded");
        }

        let pending = Arc::clone(&self.pending);
        let fire_key = key.to_string();
        let handle = self.timer.schedule(
            delay,
            Box::new(move || {
                if let Some((_, due)) = pending.remove_if(&fire_key, |_, p| p.seq == seq) {
                    let action = due.action.into_inner().unwrap_or_else(PoisonError::into_inner);
                    action();
                }
            }),
        );

        match self.pending.get_mut(key) {
            Some(mut entry) if entry.seq == seq => entry.handle = Some(handle),
            _ => {}
        }
    }

    /// Drop the pending action for `key`. Returns whether one was pending.
    pub fn cancel(&self, key: &str) -> bool {
        match self.pending.remove(key) {
            Some((_, pending)) => {
                if let Some(handle) = pending.handle {
                    self.timer.cancel(handle);
                }
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    pub fn reset(&self) {
        let keys: Vec<String> = self.pending.iter().map(|entry| entry.key().clone()).collect();
        for key in keys {
            self.cancel(&key);
        }
    }
}
