use crate::bus::CommandPublisher;
use crate::console::{Key, KeyInput, StatusSink, Style};
use crate::error::BusError;
use crate::protocol::ControlCommand;
use crate::wait::WAIT_POLL_MS;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{error, info, warn};

pub const SAFETY_POLL_MS: u64 = 20;
pub const STOP_REPEAT_GAP_MS: u64 = 100;
pub const SAFETY_POLL_INTERVAL: Duration = Duration::from_millis(SAFETY_POLL_MS);
pub const STOP_REPEAT_GAP: Duration = Duration::from_millis(STOP_REPEAT_GAP_MS);

// Abort detection runs faster than any procedure poll
const_assert!(SAFETY_POLL_MS < WAIT_POLL_MS);
const_assert!(SAFETY_POLL_MS < STOP_REPEAT_GAP_MS);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortCause {
    OperatorKey,
    Interrupt,
    Finalization,
}

/// One-way abort flag shared by every task of a session.
///
/// Once set it is never cleared. The first cause to set it is retained.
#[derive(Debug, Clone, Default)]
pub struct AbortLatch {
    flag: Arc<AtomicBool>,
    cause: Arc<OnceLock<AbortCause>>,
}

impl AbortLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the latch. Returns `true` only for the call that actually set it.
    pub fn trigger(&self, cause: AbortCause) -> bool {
        let first = !self.flag.swap(true, Ordering::AcqRel);
        if first {
            let _ = self.cause.set(cause);
        }
        first
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub fn cause(&self) -> Option<AbortCause> {
        self.cause.get().copied()
    }
}

/// Publishes the full-stop command twice, `STOP_REPEAT_GAP` apart.
///
/// Goes straight to the publisher: the abort latch does not gate this path.
pub async fn full_stop_sequence(publisher: &CommandPublisher, sink: &dyn StatusSink) -> Result<(), BusError> {
    sink.write_line("!!! EMERGENCY STOP TRIGGERED !!!", Style::Danger);
    error!("emergency stop sequence issued");

    let stop = ControlCommand::full_stop();
    let first = publisher.publish(&stop).map(|_| ());
    time::sleep(STOP_REPEAT_GAP).await;
    let second = publisher.publish(&stop).map(|_| ());

    sink.write_line("Emergency stop command sent.", Style::Danger);
    first.and(second)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    /// The operator pressed the abort key or sent an interrupt; the monitor stopped the vehicle.
    OperatorAbort,
    /// Someone else set the latch; no commands were issued.
    ExternalAbort,
}

/// Background task that owns the operator keyboard for the whole session.
pub struct SafetyMonitor {
    handle: JoinHandle<MonitorExit>,
}

impl SafetyMonitor {
    /// Starts polling `input` every 20 ms. Keys other than abort are forwarded on the
    /// returned channel.
    pub fn spawn(
        input: Box<dyn KeyInput>,
        publisher: Arc<CommandPublisher>,
        sink: Arc<dyn StatusSink>,
        latch: AbortLatch,
    ) -> (Self, mpsc::UnboundedReceiver<Key>) {
        let (forward, keys) = mpsc::unbounded_channel();
        let handle = tokio::spawn(monitor_loop(input, publisher, sink, latch, forward));
        (Self { handle }, keys)
    }

    /// Waits up to `grace` for the monitor to exit, cancelling it afterwards.
    pub async fn release(mut self, grace: Duration) -> Option<MonitorExit> {
        match time::timeout(grace, &mut self.handle).await {
            Ok(Ok(exit)) => Some(exit),
            Ok(Err(e)) => {
                warn!(error = %e, "safety monitor task failed");
                None
            }
            Err(_) => {
                warn!(?grace, "safety monitor did not exit in time, cancelling");
                self.handle.abort();
                None
            }
        }
    }
}

async fn monitor_loop(
    mut input: Box<dyn KeyInput>,
    publisher: Arc<CommandPublisher>,
    sink: Arc<dyn StatusSink>,
    latch: AbortLatch,
    forward: mpsc::UnboundedSender<Key>,
) -> MonitorExit {
    let mut ticker = time::interval(SAFETY_POLL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("safety monitor armed");

    loop {
        ticker.tick().await;
        if latch.is_set() {
            return MonitorExit::ExternalAbort;
        }

        while let Some(key) = input.poll_key() {
            if key.is_abort() {
                let cause = if key == Key::Interrupt {
                    AbortCause::Interrupt
                } else {
                    AbortCause::OperatorKey
                };
                latch.trigger(cause);
                warn!(?cause, "operator abort received");
                if let Err(e) = full_stop_sequence(&publisher, sink.as_ref()).await {
                    error!(error = %e, "emergency stop could not be published");
                }
                return MonitorExit::OperatorAbort;
            }
            // The orchestrator may have stopped listening
            let _ = forward.send(key);
        }
    }
}
