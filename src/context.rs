use crate::bus::CommandPublisher;
use crate::config::HarnessConfig;
use crate::console::{StatusSink, Style};
use crate::error::{HarnessError, HarnessResult};
use crate::protocol::{ChassisFeedback, ControlCommand, Gear};
use crate::safety::AbortLatch;
use crate::telemetry::{FeedbackCache, FrameSubscription, SampleWindow};
use crate::wait::{sleep_unless_aborted, wait_for_condition};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{info, warn};

pub const RESET_BRAKE_PERCENT: f64 = 50.0;
pub const DRIVE_HOLD_BRAKE_PERCENT: f64 = 20.0;
pub const EPB_RELEASE_TIMEOUT: Duration = Duration::from_secs(2);
pub const DRIVE_ENGAGE_TIMEOUT: Duration = Duration::from_secs(3);

/// Everything a test procedure may touch: guarded publishing, feedback reads,
/// latch-aware waits and the status surface.
#[derive(Clone)]
pub struct TestContext {
    publisher: Arc<CommandPublisher>,
    cache: Arc<FeedbackCache>,
    latch: AbortLatch,
    sink: Arc<dyn StatusSink>,
    config: Arc<HarnessConfig>,
}

impl TestContext {
    pub fn new(
        publisher: Arc<CommandPublisher>,
        cache: Arc<FeedbackCache>,
        latch: AbortLatch,
        sink: Arc<dyn StatusSink>,
        config: Arc<HarnessConfig>,
    ) -> Self {
        Self {
            publisher,
            cache,
            latch,
            sink,
            config,
        }
    }

    /// Publishes `command` unless the abort latch is set.
    pub fn send(&self, command: &ControlCommand) -> HarnessResult<()> {
        if self.latch.is_set() {
            return Err(HarnessError::Aborted);
        }
        self.publisher.publish(command)?;
        Ok(())
    }

    /// Latest frame after the default settle interval.
    pub async fn feedback(&self) -> Option<ChassisFeedback> {
        self.cache.get().await
    }

    pub async fn feedback_settled(&self, settle: Duration) -> Option<ChassisFeedback> {
        self.cache.get_settled(settle).await
    }

    pub fn latest(&self) -> Option<ChassisFeedback> {
        self.cache.latest()
    }

    /// Waits until the latest frame satisfies `predicate`. `false` on timeout or abort.
    pub async fn wait_for<P>(&self, mut predicate: P, timeout: Duration, description: &str) -> bool
    where
        P: FnMut(&ChassisFeedback) -> bool + Send,
    {
        let cache = &self.cache;
        wait_for_condition(
            &self.latch,
            || cache.latest().is_some_and(|frame| predicate(&frame)),
            timeout,
            description,
            self.sink.as_ref(),
        )
        .await
    }

    /// Latch-aware sleep. `false` when cut short by an abort.
    pub async fn hold(&self, duration: Duration) -> bool {
        sleep_unless_aborted(&self.latch, duration).await
    }

    pub fn subscribe(&self) -> FrameSubscription {
        self.cache.subscribe()
    }

    pub async fn collect<F>(&self, subscription: &mut FrameSubscription, window: Duration, extract: F) -> SampleWindow
    where
        F: FnMut(&ChassisFeedback) -> f64 + Send,
    {
        subscription.collect(window, &self.latch, extract).await
    }

    pub fn now_secs(&self) -> f64 {
        self.cache.clock().now_secs()
    }

    pub fn log(&self, text: &str, style: Style) {
        self.sink.write_line(text, style);
    }

    pub fn sink(&self) -> &dyn StatusSink {
        self.sink.as_ref()
    }

    pub fn is_aborted(&self) -> bool {
        self.latch.is_set()
    }

    pub fn latch(&self) -> &AbortLatch {
        &self.latch
    }

    pub fn publisher(&self) -> &CommandPublisher {
        &self.publisher
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Brake 50 %, NEUTRAL, parking brake, then holds for `settle`.
    pub async fn reset_to_safe_state(&self, settle: Duration) -> HarnessResult<()> {
        self.log("Resetting vehicle to a safe state...", Style::Info);
        self.send(&ControlCommand::safe_reset(RESET_BRAKE_PERCENT))?;
        self.hold(settle).await;
        Ok(())
    }

    /// Holds brake 20 %, releases the parking brake and engages DRIVE.
    ///
    /// Returns `false` if either step was not confirmed by feedback.
    pub async fn prepare_for_drive(&self) -> HarnessResult<bool> {
        self.log("Preparing vehicle for driving...", Style::Info);

        let mut command = ControlCommand {
            brake: DRIVE_HOLD_BRAKE_PERCENT,
            parking_brake: false,
            ..ControlCommand::safe_base()
        };
        self.send(&command)?;
        if !self
            .wait_for(|fb| !fb.parking_brake, EPB_RELEASE_TIMEOUT, "EPB to release")
            .await
        {
            warn!("parking brake did not release");
            self.log("Failed to release EPB.", Style::Danger);
            return Ok(false);
        }

        command.gear_location = Gear::Drive;
        self.send(&command)?;
        if !self
            .wait_for(|fb| fb.gear_location == Gear::Drive, DRIVE_ENGAGE_TIMEOUT, "gear to shift to DRIVE")
            .await
        {
            warn!("drive gear not engaged");
            self.log("Failed to shift to DRIVE.", Style::Danger);
            return Ok(false);
        }

        info!("vehicle ready to drive");
        self.log("Vehicle ready to drive.", Style::Success);
        Ok(true)
    }
}
