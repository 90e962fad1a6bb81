use crate::protocol::ChassisFeedback;
use crate::safety::AbortLatch;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{self, Duration, Instant};
use tracing::warn;

pub const DEFAULT_SETTLE: Duration = Duration::from_millis(20);
pub const MAX_WINDOW_SAMPLES: usize = 1024;   // 10 s of frames at 100 Hz
const FRAME_STREAM_CAPACITY: usize = 256;
const COLLECT_SLICE: Duration = Duration::from_millis(50);

/// Bounded `(t, value)` series captured by a collector.
pub type SampleWindow = heapless::Vec<(f64, f64), MAX_WINDOW_SAMPLES>;

/// Monotonic session time base shared by frame stamps and command timestamps.
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    origin: Instant,
}

impl SessionClock {
    pub fn start() -> Self {
        Self { origin: Instant::now() }
    }

    pub fn now_secs(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::start()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimedFrame {
    pub received_at: f64,
    pub frame: ChassisFeedback,
}

/// Single-slot latest-value store for chassis feedback.
///
/// Writers overwrite the slot; readers get a copy of the most recent frame and never
/// block on the producer. Every frame is also fanned out to sample collectors.
#[derive(Debug)]
pub struct FeedbackCache {
    latest: Mutex<Option<TimedFrame>>,
    stream: broadcast::Sender<TimedFrame>,
    clock: SessionClock,
    frames_received: AtomicU64,
}

impl FeedbackCache {
    pub fn new(clock: SessionClock) -> Self {
        let (stream, _) = broadcast::channel(FRAME_STREAM_CAPACITY);
        Self {
            latest: Mutex::new(None),
            stream,
            clock,
            frames_received: AtomicU64::new(0),
        }
    }

    pub fn update(&self, frame: ChassisFeedback) {
        let timed = TimedFrame {
            received_at: self.clock.now_secs(),
            frame,
        };
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(timed.clone());
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        // No subscribers is the normal case outside measurement windows
        let _ = self.stream.send(timed);
    }

    /// Waits the default settle interval, then reads the slot.
    pub async fn get(&self) -> Option<ChassisFeedback> {
        self.get_settled(DEFAULT_SETTLE).await
    }

    pub async fn get_settled(&self, settle: Duration) -> Option<ChassisFeedback> {
        if !settle.is_zero() {
            time::sleep(settle).await;
        }
        self.latest()
    }

    pub fn latest(&self) -> Option<ChassisFeedback> {
        self.latest_timed().map(|timed| timed.frame)
    }

    pub fn latest_timed(&self) -> Option<TimedFrame> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn subscribe(&self) -> FrameSubscription {
        FrameSubscription {
            rx: self.stream.subscribe(),
        }
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    pub fn clock(&self) -> SessionClock {
        self.clock
    }
}

/// Receives every frame published after the subscription was taken.
#[derive(Debug)]
pub struct FrameSubscription {
    rx: broadcast::Receiver<TimedFrame>,
}

impl FrameSubscription {
    /// Records `extract(frame)` for every frame arriving within `window`.
    ///
    /// Returns early when the latch is set, the stream closes, or the window is full.
    pub async fn collect<F>(&mut self, window: Duration, latch: &AbortLatch, mut extract: F) -> SampleWindow
    where
        F: FnMut(&ChassisFeedback) -> f64,
    {
        let deadline = Instant::now() + window;
        let mut samples = SampleWindow::new();

        loop {
            if latch.is_set() {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }

            let slice = (deadline - now).min(COLLECT_SLICE);
            match time::timeout(slice, self.rx.recv()).await {
                Ok(Ok(timed)) => {
                    if samples.push((timed.received_at, extract(&timed.frame))).is_err() {
                        warn!(capacity = MAX_WINDOW_SAMPLES, "sample window full, truncating collection");
                        break;
                    }
                }
                Ok(Err(RecvError::Lagged(skipped))) => {
                    warn!(skipped, "sample collector lagged behind feedback stream");
                }
                Ok(Err(RecvError::Closed)) => break,
                Err(_) => {}
            }
        }

        samples
    }
}
