//! Timer port.
//!
//! # Responsibilities
//! - Schedule one-shot and repeating callbacks
//! - Cancel them through an opaque handle
//!
//! # Design Decisions
//! - The core only talks to [`TimerPort`]; hosts may plug in their own clock
//! - [`TokioTimer`] runs each timer as a tokio task, so tests drive it with
//!   tokio's paused clock
//! - Cancelling an unknown or already-fired handle is a no-op

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::AbortHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Opaque id of a scheduled callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

/// Callback fired once.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Callback fired on every interval.
pub type RepeatingCallback = Arc<dyn Fn() + Send + Sync + 'static>;

/// Host-supplied scheduling.
pub trait TimerPort: Send + Sync {
    /// Run `callback` once after `delay`.
    fn schedule(&self, delay: Duration, callback: Callback) -> TimerHandle;

    /// Run `callback` every `interval`, first after one interval.
    fn schedule_repeating(&self, interval: Duration, callback: RepeatingCallback) -> TimerHandle;

    /// Stop a timer. Callbacks already running are not interrupted.
    fn cancel(&self, handle: TimerHandle);

    /// Timers that may still fire.
    fn active(&self) -> usize;
}

/// [`TimerPort`] backed by tokio tasks.
///
/// Must be used from within a tokio runtime.
#[derive(Debug, Default)]
pub struct TokioTimer {
    next_id: AtomicU64,
    tasks: DashMap<u64, AbortHandle>,
}

impl TokioTimer {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, task: AbortHandle) -> TimerHandle {
        // Fired one-shots are pruned lazily.
        self.tasks.retain(|_, task| !task.is_finished());

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.tasks.insert(id, task);
        TimerHandle(id)
    }
}

impl TimerPort for TokioTimer {
    fn schedule(&self, delay: Duration, callback: Callback) -> TimerHandle {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
        self.register(task.abort_handle())
    }

    fn schedule_repeating(&self, interval: Duration, callback: RepeatingCallback) -> TimerHandle {
        let period = interval.max(Duration::from_millis(1));
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                callback();
            }
        });
        self.register(task.abort_handle())
    }

    fn cancel(&self, handle: TimerHandle) {
        if let Some((_, task)) = self.tasks.remove(&handle.0) {
            task.abort();
        }
    }

    fn active(&self) -> usize {
        self.tasks.iter().filter(|task| !task.is_finished()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> usize) {
        let count = Arc::new(AtomicUsize::new(0));
        let read = {
            let count = count.clone();
            move || count.load(Ordering::SeqCst)
        };
        (count, read)
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_shot_fires_once() {
        let timer = TokioTimer::new();
        let (count, read) = counter();

        timer.schedule(
            Duration::from_millis(100),
            Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }),
        );

        tokio::time::sleep(Duration::from_millis(99)).await;
        assert_eq!(read(), 0);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(read(), 1);
        assert_eq!(timer.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_fire() {
        let timer = TokioTimer::new();
        let (count, read) = counter();

        let handle = timer.schedule(
            Duration::from_millis(100),
            Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(timer.active(), 1);
        timer.cancel(handle);
        timer.cancel(handle);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(read(), 0);
        assert_eq!(timer.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeating_until_cancelled() {
        let timer = TokioTimer::new();
        let (count, read) = counter();

        let handle = timer.schedule_repeating(
            Duration::from_millis(100),
            Arc::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }),
        );

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(read(), 3);

        timer.cancel(handle);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(read(), 3);
    }
}
