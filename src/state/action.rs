//! Per-consumer record.

use tokio::time::Instant;

use crate::error::{BreakerOpen, ClassifiedError, GuardError, Outcome};
use crate::timer::TimerHandle;

/// What one polling consumer last saw, plus the timer it owns.
#[derive(Debug, Clone)]
pub struct ActionState<R> {
    pub polling_handle: Option<TimerHandle>,
    pub last_result: Option<R>,
    pub last_error: Option<ClassifiedError>,
    /// Set while the last round was refused by an open circuit.
    pub breaker_open: Option<BreakerOpen>,
    pub last_update: Option<Instant>,
    pub connection_attempts: u32,
    pub rotation_index: usize,
    /// Polling generation. Rounds started under an older generation do not
    /// write back.
    pub(crate) epoch: u64,
}

impl<R> Default for ActionState<R> {
    fn default() -> Self {
        Self {
            polling_handle: None,
            last_result: None,
            last_error: None,
            breaker_open: None,
            last_update: None,
            connection_attempts: 0,
            rotation_index: 0,
            epoch: 0,
        }
    }
}

impl<R> ActionState<R> {
    pub fn is_polling(&self) -> bool {
        self.polling_handle.is_some()
    }

    pub(crate) fn apply_success(&mut self, value: R) {
        self.last_result = Some(value);
        self.last_error = None;
        self.breaker_open = None;
        self.connection_attempts = 0;
        self.last_update = Some(Instant::now());
    }

    /// The previous result is kept so a display can show stale data next to
    /// the error.
    pub(crate) fn apply_error(&mut self, error: ClassifiedError) {
        self.last_error = Some(error);
        self.breaker_open = None;
        self.connection_attempts = self.connection_attempts.saturating_add(1);
        self.last_update = Some(Instant::now());
    }

    /// Breaker-open means nothing was attempted, so attempts are untouched.
    pub(crate) fn apply_breaker_open(&mut self, open: BreakerOpen) {
        self.breaker_open = Some(open);
        self.last_update = Some(Instant::now());
    }

    pub(crate) fn apply_failure(&mut self, error: GuardError) {
        match error {
            GuardError::Failed(err) => self.apply_error(err),
            GuardError::BreakerOpen(open) => self.apply_breaker_open(open),
        }
    }
}

impl<R: Clone> ActionState<R> {
    /// Latest round as an [`Outcome`], if any round finished.
    pub fn outcome(&self) -> Option<Outcome<R>> {
        if let Some(open) = &self.breaker_open {
            return Some(Outcome::BreakerOpen(open.clone()));
        }
        if let Some(err) = &self.last_error {
            return Some(match err.retryable() {
                true => Outcome::Retryable(err.clone()),
                false => Outcome::Fatal(err.clone()),
            });
        }
        self.last_result.clone().map(Outcome::Success)
    }
}
