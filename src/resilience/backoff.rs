//! Exponential backoff with jitter.

use std::time::Duration;
use rand::Rng;

/// Delay before retry number `attempt + 1`.
///
/// `min(base * 2^attempt + jitter, max)` where jitter is drawn uniformly from
/// `[0, max_jitter)`.
pub fn calculate_backoff(
    attempt: u32,
    base: Duration,
    max: Duration,
    max_jitter: Duration,
) -> Duration {
    let base_ms = base.as_millis() as u64;
    let exponential_base = 2u64.saturating_pow(attempt);
    let delay_ms = base_ms.saturating_mul(exponential_base);

    let jitter_range = max_jitter.as_millis() as u64;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(delay_ms.saturating_add(jitter)).min(max)
}
