//! Polling driver.
//!
//! # Responsibilities
//! - Run one round immediately, then one per interval via [`TimerPort`]
//! - Skip a tick while the previous round is still outstanding
//! - Write each finished round into the consumer's [`ActionState`]
//!   unless the consumer detached or restarted polling meanwhile
//!
//! # Design Decisions
//! - Rounds run as spawned tasks; the timer callback never blocks
//! - Stopping cancels future ticks but not an in-flight round
//!
//! [`ActionState`]: crate::state::ActionState

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::GuardResult;
use crate::observability::metrics;
use crate::state::ActionStateStore;
use crate::timer::{TimerHandle, TimerPort};

/// One polling registration: a consumer, its generation and its tick.
struct Round<R, F> {
    consumer: String,
    epoch: u64,
    busy: AtomicBool,
    states: Arc<ActionStateStore<R>>,
    tick: F,
}

/// Clears the busy flag when a round ends, panics included.
struct InFlight<R, F>(Arc<Round<R, F>>);

impl<R, F> Drop for InFlight<R, F> {
    fn drop(&mut self) {
        self.0.busy.store(false, Ordering::Release);
    }
}

impl<R, F, Fut> Round<R, F>
where
    R: Clone + Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = GuardResult<R>> + Send + 'static,
{
    fn fire(self: &Arc<Self>) {
        if self.busy.swap(true, Ordering::AcqRel) {
            tracing::debug!(consumer = %self.consumer, "Previous round still running, skipping tick");
            metrics::record_tick_skipped(&self.consumer);
            return;
        }

        let in_flight = InFlight(Arc::clone(self));
        let work = (self.tick)();
        tokio::spawn(async move {
            let result = work.await;
            let round = &in_flight.0;
            if !round.states.complete(&round.consumer, round.epoch, result) {
                tracing::debug!(
                    consumer = %round.consumer,
                    epoch = round.epoch,
                    "Consumer detached or restarted, discarding result"
                );
            }
        });
    }
}

/// Drives repeating rounds for any number of consumers.
pub struct Poller<R> {
    states: Arc<ActionStateStore<R>>,
    timer: Arc<dyn TimerPort>,
}

impl<R> Clone for Poller<R> {
    fn clone(&self) -> Self {
        Self {
            states: Arc::clone(&self.states),
            timer: Arc::clone(&self.timer),
        }
    }
}

impl<R> Poller<R>
where
    R: Clone + Send + Sync + 'static,
{
    pub fn new(states: Arc<ActionStateStore<R>>, timer: Arc<dyn TimerPort>) -> Self {
        Self { states, timer }
    }

    /// Start (or restart) polling for `consumer`.
    ///
    /// Results of rounds started by an earlier registration are discarded.
    /// Must be called from within a tokio runtime.
    pub fn start<F, Fut>(&self, consumer: &str, interval: Duration, tick: F) -> TimerHandle
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = GuardResult<R>> + Send + 'static,
    {
        let epoch = self.states.begin_polling(consumer);
        let round = Arc::new(Round {
            consumer: consumer.to_string(),
            epoch,
            busy: AtomicBool::new(false),
            states: Arc::clone(&self.states),
            tick,
        });

        tracing::info!(consumer = %consumer, interval = ?interval, epoch, "Polling started");
        round.fire();

        let handle = self
            .timer
            .schedule_repeating(interval, Arc::new(move || round.fire()));
        self.states.set_polling_handle(consumer, handle);
        handle
    }

    /// Stop future ticks; the consumer's record and last result stay.
    pub fn stop(&self, consumer: &str) {
        self.states.stop_polling(consumer);
        tracing::info!(consumer = %consumer, "Polling stopped");
    }

    /// Stop polling and drop the consumer's record.
    pub fn detach(&self, consumer: &str) -> bool {
        let removed = self.states.clear_state(consumer);
        if removed {
            tracing::info!(consumer = %consumer, "Consumer detached");
        }
        removed
    }

    pub fn states(&self) -> &Arc<ActionStateStore<R>> {
        &self.states
    }
}
