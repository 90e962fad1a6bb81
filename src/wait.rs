use crate::console::{StatusSink, Style};
use crate::safety::AbortLatch;
use tokio::time::{self, Duration, Instant};
use tracing::{debug, warn};

pub const WAIT_POLL_MS: u64 = 50;
pub const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(WAIT_POLL_MS);

/// Polls `predicate` every 50 ms until it holds, the latch is set, or `timeout` elapses.
///
/// Returns `true` only when the predicate held. A timeout emits
/// `Timeout waiting for: <description>` on the status sink.
pub async fn wait_for_condition<P>(
    latch: &AbortLatch,
    mut predicate: P,
    timeout: Duration,
    description: &str,
    sink: &dyn StatusSink,
) -> bool
where
    P: FnMut() -> bool,
{
    let start = Instant::now();

    loop {
        if latch.is_set() {
            debug!(description, "wait interrupted by safety abort");
            return false;
        }
        if predicate() {
            return true;
        }
        if start.elapsed() >= timeout {
            warn!(description, ?timeout, "condition wait timed out");
            sink.write_line(&format!("Timeout waiting for: {description}"), Style::Warning);
            return false;
        }
        time::sleep(WAIT_POLL_INTERVAL).await;
    }
}

/// Sleeps for `duration` in poll-sized slices. Returns `false` if the latch cut it short.
pub async fn sleep_unless_aborted(latch: &AbortLatch, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;

    loop {
        if latch.is_set() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        time::sleep((deadline - now).min(WAIT_POLL_INTERVAL)).await;
    }
}
