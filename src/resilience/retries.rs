//! Retry logic.
//!
//! # Responsibilities
//! - Classify each failure exactly once, where it is caught
//! - Retry retryable kinds with exponential backoff + jitter, or with the
//!   delay a rate-limited upstream asked for
//! - Enforce the caller's retry budget
//! - Track per-key retry bookkeeping, cleared on success
//!
//! # Design Decisions
//! - Breaker-open is never retried and never classified
//! - Non-retryable kinds surface after a single attempt
//! - Jittered backoff prevents thundering herd

use std::future::Future;
use std::time::Duration;

use dashmap::DashMap;

use crate::config::RetryConfig;
use crate::error::{AttemptError, ClassifiedError, ErrorKind, GuardError, GuardResult};
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::classify::ErrorClassifier;

/// Retry budget and delay shape for one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_jitter: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Self::default()
        }
    }

    /// Delay before the retry following failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32, error: &ClassifiedError) -> Duration {
        match (error.kind(), error.retry_after()) {
            (ErrorKind::RateLimit, Some(explicit)) => explicit,
            _ => calculate_backoff(attempt, self.base_delay, self.max_delay, self.max_jitter),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_jitter: Duration::from_millis(config.max_jitter_ms),
        }
    }
}

/// Executes fallible operations with bounded retries.
#[derive(Debug, Default)]
pub struct RetryExecutor {
    classifier: ErrorClassifier,
    retries: DashMap<String, u32>,
}

impl RetryExecutor {
    pub fn new(classifier: ErrorClassifier) -> Self {
        Self {
            classifier,
            retries: DashMap::new(),
        }
    }

    /// Retries scheduled for `key` since its last success.
    pub fn retry_count(&self, key: &str) -> u32 {
        self.retries.get(key).map(|count| *count).unwrap_or(0)
    }

    /// Drop bookkeeping for `key`.
    pub fn forget(&self, key: &str) {
        self.retries.remove(key);
    }

    pub async fn execute<T, E, F, Fut>(
        &self,
        key: &str,
        policy: RetryPolicy,
        operation: F,
    ) -> GuardResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<AttemptError>,
    {
        self.execute_with_retry(key, policy, operation, |_, _| {}).await
    }

    /// Run `operation`, retrying retryable failures.
    ///
    /// `on_retry` receives the 1-based number of the retry about to happen
    /// and the error that caused it.
    pub async fn execute_with_retry<T, E, F, Fut, R>(
        &self,
        key: &str,
        policy: RetryPolicy,
        mut operation: F,
        mut on_retry: R,
    ) -> GuardResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<AttemptError>,
        R: FnMut(u32, &ClassifiedError),
    {
        let mut attempt: u32 = 0;
        loop {
            let raw = match operation().await {
                Ok(value) => {
                    self.forget(key);
                    return Ok(value);
                }
                Err(err) => match err.into() {
                    AttemptError::BreakerOpen(open) => return Err(GuardError::BreakerOpen(open)),
                    AttemptError::Failed(raw) => raw,
                },
            };

            let error = self.classifier.classify(raw);
            if !error.retryable() || attempt >= policy.max_retries {
                tracing::debug!(
                    key = %key,
                    attempt,
                    kind = %error.kind(),
                    retryable = error.retryable(),
                    "Giving up"
                );
                return Err(GuardError::Failed(error));
            }

            let delay = policy.delay_for(attempt, &error);
            attempt += 1;
            *self.retries.entry(key.to_string()).or_insert(0) += 1;
            metrics::record_retry(error.kind());
            tracing::info!(
                key = %key,
                attempt,
                max_retries = policy.max_retries,
                delay = ?delay,
                kind = %error.kind(),
                "Retrying upstream call"
            );
            on_retry(attempt, &error);

            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UpstreamError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            max_jitter: Duration::from_millis(1000),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let executor = RetryExecutor::default();
        let calls = AtomicU32::new(0);
        let mut seen = Vec::new();

        let result = executor
            .execute_with_retry(
                "builds",
                policy(3),
                || async {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(UpstreamError::new("unavailable").with_status(503))
                    } else {
                        Ok("green")
                    }
                },
                |attempt, err| seen.push((attempt, err.kind())),
            )
            .await;

        assert_eq!(result.unwrap(), "green");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(seen, vec![(1, ErrorKind::ApiError), (2, ErrorKind::ApiError)]);
        assert_eq!(executor.retry_count("builds"), 0, "cleared on success");
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_runs_once() {
        let executor = RetryExecutor::default();
        let calls = AtomicU32::new(0);

        let result = executor
            .execute("prs", policy(5), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(UpstreamError::new("bad token").with_status(401))
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.classified().unwrap().kind(), ErrorKind::Authentication);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhausted() {
        let executor = RetryExecutor::default();
        let calls = AtomicU32::new(0);

        let result = executor
            .execute("releases", policy(2), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(UpstreamError::new("refused").with_code("ECONNREFUSED"))
            })
            .await;

        let err = result.unwrap_err();
        let classified = err.classified().unwrap();
        assert_eq!(classified.kind(), ErrorKind::Network);
        assert!(classified.retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(executor.retry_count("releases"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_uses_retry_after() {
        let executor = RetryExecutor::default();
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result = executor
            .execute("wi", policy(1), || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(UpstreamError::new("slow down")
                        .with_status(429)
                        .with_header("retry-after", "45"))
                } else {
                    Ok(1)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 1);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(45) && elapsed < Duration::from_secs(46));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_without_header_waits_default() {
        let executor = RetryExecutor::default();
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result = executor
            .execute("wi", policy(1), || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(UpstreamError::new("slow down").with_status(429))
                } else {
                    Ok(1)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(60) && elapsed < Duration::from_secs(61));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_delay_bounds() {
        let executor = RetryExecutor::default();
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let _ = executor
            .execute("bounds", policy(2), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(UpstreamError::new("boom").with_status(502))
            })
            .await;

        // 100ms + 200ms of backoff plus up to 1s of jitter per retry.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(2_300));
    }

    #[tokio::test]
    async fn test_breaker_open_is_not_retried() {
        let executor = RetryExecutor::default();
        let calls = AtomicU32::new(0);

        let result = executor
            .execute("open", policy(5), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(AttemptError::BreakerOpen(crate::error::BreakerOpen {
                    circuit: "open".into(),
                    consecutive_failures: 5,
                    retry_in: Duration::from_secs(10),
                }))
            })
            .await;

        assert!(result.unwrap_err().is_breaker_open());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
