//! Keyed store of [`ActionState`] records.
//!
//! # Responsibilities
//! - Create records lazily, destroy them only on explicit release
//! - Own each consumer's polling timer and cancel it on replace or release
//! - Gate late results behind the polling generation
//!
//! # Design Decisions
//! - Generations come from one store-wide counter, so a record that is
//!   cleared and recreated never reuses a generation
//! - Timers are cancelled outside the map lock

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{BreakerOpen, ClassifiedError, GuardResult};
use crate::state::action::ActionState;
use crate::timer::{TimerHandle, TimerPort};

pub struct ActionStateStore<R> {
    states: DashMap<String, ActionState<R>>,
    timer: Arc<dyn TimerPort>,
    next_epoch: AtomicU64,
}

impl<R: Clone> ActionStateStore<R> {
    pub fn new(timer: Arc<dyn TimerPort>) -> Self {
        Self {
            states: DashMap::new(),
            timer,
            next_epoch: AtomicU64::new(1),
        }
    }

    /// Snapshot of the record for `id`, creating a default one if absent.
    pub fn get_or_create(&self, id: &str) -> ActionState<R> {
        self.states.entry(id.to_string()).or_default().clone()
    }

    pub fn get(&self, id: &str) -> Option<ActionState<R>> {
        self.states.get(id).map(|state| state.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.states.contains_key(id)
    }

    /// Store `handle` as the consumer's timer, cancelling any previous one.
    pub fn set_polling_handle(&self, id: &str, handle: TimerHandle) {
        let previous = self
            .states
            .entry(id.to_string())
            .or_default()
            .polling_handle
            .replace(handle);
        if let Some(previous) = previous.filter(|previous| *previous != handle) {
            self.timer.cancel(previous);
        }
    }

    /// Cancel and forget the consumer's timer. The record stays.
    pub fn stop_polling(&self, id: &str) {
        let handle = self
            .states
            .get_mut(id)
            .and_then(|mut state| state.polling_handle.take());
        if let Some(handle) = handle {
            self.timer.cancel(handle);
        }
    }

    pub fn increment_connection_attempts(&self, id: &str) -> u32 {
        let mut state = self.states.entry(id.to_string()).or_default();
        state.connection_attempts = state.connection_attempts.saturating_add(1);
        state.connection_attempts
    }

    pub fn reset_connection_attempts(&self, id: &str) {
        if let Some(mut state) = self.states.get_mut(id) {
            state.connection_attempts = 0;
        }
    }

    /// Advance the rotation index modulo `max_index`; always 0 when
    /// `max_index` is 0.
    pub fn increment_rotation_index(&self, id: &str, max_index: usize) -> usize {
        let mut state = self.states.entry(id.to_string()).or_default();
        state.rotation_index = match max_index {
            0 => 0,
            max => (state.rotation_index + 1) % max,
        };
        state.rotation_index
    }

    pub fn record_success(&self, id: &str, value: R) {
        self.states.entry(id.to_string()).or_default().apply_success(value);
    }

    pub fn record_error(&self, id: &str, error: ClassifiedError) {
        self.states.entry(id.to_string()).or_default().apply_error(error);
    }

    pub fn record_breaker_open(&self, id: &str, open: BreakerOpen) {
        self.states.entry(id.to_string()).or_default().apply_breaker_open(open);
    }

    /// Start a new polling generation for `id` and return it.
    pub fn begin_polling(&self, id: &str) -> u64 {
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        self.states.entry(id.to_string()).or_default().epoch = epoch;
        epoch
    }

    /// Write back a finished round started under `epoch`.
    ///
    /// Returns false, discarding the result, when the record was cleared or
    /// polling restarted since.
    pub fn complete(&self, id: &str, epoch: u64, result: GuardResult<R>) -> bool {
        match self.states.get_mut(id) {
            Some(mut state) if state.epoch == epoch => {
                match result {
                    Ok(value) => state.apply_success(value),
                    Err(err) => state.apply_failure(err),
                }
                true
            }
            _ => false,
        }
    }

    /// Cancel the consumer's timer and remove its record.
    pub fn clear_state(&self, id: &str) -> bool {
        match self.states.remove(id) {
            Some((_, state)) => {
                if let Some(handle) = state.polling_handle {
                    self.timer.cancel(handle);
                }
                true
            }
            None => false,
        }
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.states.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Release every consumer. Used at shutdown.
    pub fn clear_all(&self) {
        for id in self.ids() {
            self.clear_state(&id);
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
