use chassis_tester::*;
use std::sync::Arc;
use tokio::time::{Duration, Instant};

fn frame_with_speed(speed: f64) -> ChassisFeedback {
    ChassisFeedback {
        speed_mps: speed,
        ..ChassisFeedback::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_cache_starts_empty() {
    let cache = FeedbackCache::new(SessionClock::start());

    assert!(cache.latest().is_none());
    assert!(cache.get().await.is_none());
    assert_eq!(cache.frames_received(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cache_keeps_only_latest_frame() {
    let cache = FeedbackCache::new(SessionClock::start());

    cache.update(frame_with_speed(1.0));
    cache.update(frame_with_speed(2.0));

    assert_eq!(cache.latest().map(|f| f.speed_mps), Some(2.0));
    assert_eq!(cache.frames_received(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_get_waits_settle_interval() {
    let cache = Arc::new(FeedbackCache::new(SessionClock::start()));
    cache.update(frame_with_speed(1.0));

    let writer = cache.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        writer.update(frame_with_speed(3.0));
    });

    let start = Instant::now();
    let frame = cache.get().await;
    assert_eq!(start.elapsed(), Duration::from_millis(20));
    assert_eq!(frame.map(|f| f.speed_mps), Some(3.0));
}

#[tokio::test(start_paused = true)]
async fn test_received_at_uses_session_clock() {
    let cache = FeedbackCache::new(SessionClock::start());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    cache.update(frame_with_speed(0.0));

    let timed = cache.latest_timed().unwrap();
    assert!((timed.received_at - 1.5).abs() < 1e-6);
}

#[tokio::test(start_paused = true)]
async fn test_collect_records_frames_within_window() {
    let cache = Arc::new(FeedbackCache::new(SessionClock::start()));
    let latch = AbortLatch::new();
    let mut subscription = cache.subscribe();

    let writer = cache.clone();
    let producer = tokio::spawn(async move {
        for i in 0..30 {
            writer.update(frame_with_speed(f64::from(i)));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });

    let samples = subscription
        .collect(Duration::from_millis(200), &latch, |f| f.speed_mps)
        .await;
    producer.await.unwrap();

    assert!(samples.len() >= 19 && samples.len() <= 21);
    assert_eq!(samples[0].1, 0.0);
    assert!(samples.windows(2).all(|w| w[0].0 <= w[1].0));
}

#[tokio::test(start_paused = true)]
async fn test_collect_stops_on_abort() {
    let cache = Arc::new(FeedbackCache::new(SessionClock::start()));
    let latch = AbortLatch::new();
    let mut subscription = cache.subscribe();

    let trigger = latch.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.trigger(AbortCause::OperatorKey);
    });

    let start = Instant::now();
    let samples = subscription
        .collect(Duration::from_secs(4), &latch, |f| f.steering_percentage)
        .await;

    assert!(samples.is_empty());
    assert!(start.elapsed() <= Duration::from_millis(150));
}

#[tokio::test(start_paused = true)]
async fn test_collect_ignores_frames_before_subscription() {
    let cache = FeedbackCache::new(SessionClock::start());
    let latch = AbortLatch::new();

    cache.update(frame_with_speed(9.0));
    let mut subscription = cache.subscribe();

    let samples = subscription
        .collect(Duration::from_millis(100), &latch, |f| f.speed_mps)
        .await;
    assert!(samples.is_empty());
}
