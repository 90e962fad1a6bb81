use chassis_tester::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::time::{Duration, Instant};

#[tokio::test(start_paused = true)]
async fn test_wait_returns_true_when_predicate_holds() {
    let latch = AbortLatch::new();
    let sink = MemorySink::new();
    let mut polls = 0;

    let met = wait_for_condition(
        &latch,
        || {
            polls += 1;
            polls >= 3
        },
        Duration::from_secs(1),
        "third poll",
        &sink,
    )
    .await;

    assert!(met);
    assert_eq!(polls, 3);
    assert!(sink.lines().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_wait_timeout_reports_description() {
    let latch = AbortLatch::new();
    let sink = MemorySink::new();
    let start = Instant::now();

    let met = wait_for_condition(&latch, || false, Duration::from_millis(500), "gear to shift", &sink).await;

    assert!(!met);
    assert!(start.elapsed() >= Duration::from_millis(500));
    assert!(start.elapsed() < Duration::from_millis(600));
    let lines = sink.lines();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].0, Style::Warning);
    assert_eq!(lines[0].1, "Timeout waiting for: gear to shift");
}

#[tokio::test(start_paused = true)]
async fn test_wait_checks_latch_before_predicate() {
    let latch = AbortLatch::new();
    latch.trigger(AbortCause::OperatorKey);
    let sink = MemorySink::new();
    let mut called = false;

    let met = wait_for_condition(
        &latch,
        || {
            called = true;
            true
        },
        Duration::from_secs(1),
        "anything",
        &sink,
    )
    .await;

    assert!(!met);
    assert!(!called);
    assert!(sink.lines().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_wait_exits_within_one_poll_of_abort() {
    let latch = AbortLatch::new();
    let sink = MemorySink::new();
    let trigger = latch.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(120)).await;
        trigger.trigger(AbortCause::OperatorKey);
    });

    let polls = Arc::new(AtomicU32::new(0));
    let counter = polls.clone();
    let start = Instant::now();
    let met = wait_for_condition(
        &latch,
        || {
            counter.fetch_add(1, Ordering::Relaxed);
            false
        },
        Duration::from_secs(10),
        "never",
        &sink,
    )
    .await;

    assert!(!met);
    assert!(start.elapsed() <= Duration::from_millis(170));
    assert!(polls.load(Ordering::Relaxed) >= 3);
}

#[tokio::test(start_paused = true)]
async fn test_sleep_unless_aborted_runs_full_duration() {
    let latch = AbortLatch::new();
    let start = Instant::now();

    assert!(sleep_unless_aborted(&latch, Duration::from_millis(230)).await);
    assert_eq!(start.elapsed(), Duration::from_millis(230));
}

#[tokio::test(start_paused = true)]
async fn test_sleep_unless_aborted_cut_short() {
    let latch = AbortLatch::new();
    let trigger = latch.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(60)).await;
        trigger.trigger(AbortCause::Interrupt);
    });

    let start = Instant::now();
    assert!(!sleep_unless_aborted(&latch, Duration::from_secs(5)).await);
    assert!(start.elapsed() <= Duration::from_millis(100));
}

#[test]
fn test_latch_keeps_first_cause() {
    let latch = AbortLatch::new();
    assert!(!latch.is_set());
    assert_eq!(latch.cause(), None);

    assert!(latch.trigger(AbortCause::Interrupt));
    assert!(!latch.trigger(AbortCause::Finalization));

    let shared = latch.clone();
    assert!(shared.is_set());
    assert_eq!(shared.cause(), Some(AbortCause::Interrupt));
}
