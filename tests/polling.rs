//! Polling consumers driven by the tokio-backed timer.

use std::time::Duration;

use pollguard::{ErrorKind, Outcome, TimerPort};

mod common;
use common::{fast_config, guard, Scripted};

#[tokio::test(start_paused = true)]
async fn test_ticks_never_overlap() {
    let (guard, _) = guard::<u32>(&fast_config());
    let upstream = Scripted::healthy().with_latency(Duration::from_millis(2_500));

    guard.poll("builds", "builds", Duration::from_secs(1), Duration::ZERO, upstream.op());

    // Round 1 runs 0s..2.5s, ticks at 1s and 2s are skipped, round 2 starts
    // at 3s and ends at 5.5s, tick at 4s and 5s are skipped.
    tokio::time::sleep(Duration::from_millis(5_900)).await;
    assert_eq!(upstream.calls(), 2);
    assert_eq!(guard.state("builds").unwrap().last_result, Some(2));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(upstream.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_result_after_detach_is_discarded() {
    let (guard, _) = guard::<u32>(&fast_config());
    let upstream = Scripted::healthy().with_latency(Duration::from_secs(1));

    guard.poll("prs", "prs", Duration::from_secs(10), Duration::ZERO, upstream.op());
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(guard.detach("prs"));
    let fresh = guard.states().get_or_create("prs");
    assert!(fresh.last_result.is_none());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(upstream.calls(), 1);
    let state = guard.state("prs").unwrap();
    assert!(state.last_result.is_none());
    assert!(state.last_update.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_detach_cancels_timer() {
    let (guard, timer) = guard::<u32>(&fast_config());
    let upstream = Scripted::healthy();

    guard.poll("wi", "wi", Duration::from_secs(1), Duration::ZERO, upstream.op());
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(upstream.calls(), 3);
    assert_eq!(timer.active(), 1);

    guard.detach("wi");
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(upstream.calls(), 3);
    assert_eq!(timer.active(), 0);
    assert!(guard.state("wi").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_stop_keeps_last_state() {
    let (guard, _) = guard::<u32>(&fast_config());
    let upstream = Scripted::healthy();

    guard.poll("sprint", "sprint", Duration::from_secs(1), Duration::ZERO, upstream.op());
    tokio::time::sleep(Duration::from_millis(10)).await;
    guard.stop("sprint");
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(upstream.calls(), 1);
    let state = guard.state("sprint").unwrap();
    assert!(!state.is_polling());
    assert_eq!(state.outcome(), Some(Outcome::Success(1)));
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_recorded_as_breaker_outcome() {
    let mut config = fast_config();
    config.retries.max_retries = 0;
    config.circuit_breaker.failure_threshold = 1;
    config.circuit_breaker.reset_timeout_ms = 60_000;
    let (guard, _) = guard::<u32>(&config);
    let upstream = Scripted::always_failing(503);

    guard.poll("releases", "releases", Duration::from_secs(1), Duration::ZERO, upstream.op());

    tokio::time::sleep(Duration::from_millis(10)).await;
    let state = guard.state("releases").unwrap();
    assert_eq!(state.connection_attempts, 1);
    assert_eq!(state.last_error.as_ref().unwrap().kind(), ErrorKind::ApiError);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let state = guard.state("releases").unwrap();
    assert_eq!(upstream.calls(), 1);
    assert_eq!(state.connection_attempts, 1, "not attempted while open");
    assert!(matches!(state.outcome(), Some(Outcome::BreakerOpen(_))));
}

#[tokio::test(start_paused = true)]
async fn test_consumers_sharing_a_key_share_the_call() {
    let (guard, _) = guard::<u32>(&fast_config());
    let upstream = Scripted::healthy().with_latency(Duration::from_millis(100));
    let ttl = Duration::from_secs(30);

    guard.poll("button-1", "pipelines", Duration::from_secs(60), ttl, upstream.op());
    guard.poll("button-2", "pipelines", Duration::from_secs(60), ttl, upstream.op());
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(upstream.calls(), 1);
    assert_eq!(guard.state("button-1").unwrap().last_result, Some(1));
    assert_eq!(guard.state("button-2").unwrap().last_result, Some(1));
}
