//! Standard chassis validation plan.
//!
//! Tier 1 runs with the vehicle stationary, tier 2 at low speed, tier 3 exercises
//! high-dynamic manoeuvres and announces each one before moving.

pub mod high_dynamic;
pub mod low_speed;
pub mod static_checks;

use crate::console::Style;
use crate::context::TestContext;
use crate::orchestrator::{TestCase, Tier};
use crate::protocol::{ChassisFeedback, ControlCommand, Gear};
use crate::verdict::Verdict;
use tokio::time::{self, Duration, Instant};

pub const MOVING_THRESHOLD_MPS: f64 = 0.1;
pub const STOPPED_THRESHOLD_MPS: f64 = 0.1;
pub const START_MOVING_TIMEOUT: Duration = Duration::from_secs(5);
const RESPONSE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// The full plan in execution order.
pub fn standard_suite() -> Vec<TestCase> {
    vec![
        TestCase::new("TC-FUNC-01: Driving Mode Transition", Tier::Static, static_checks::driving_mode_transition),
        TestCase::new("TC-CTRL-07: Static Steering Performance", Tier::Static, static_checks::static_steering),
        TestCase::new("TC-FUNC-04: EPB Toggle", Tier::Static, static_checks::epb_toggle),
        TestCase::new("TC-FUNC-02: Static Gear Shift", Tier::Static, static_checks::static_gear_shift),
        TestCase::new("TC-SIG-ALL: All Signal Controls (Lights, Horn)", Tier::Static, static_checks::signal_controls),
        TestCase::new("TC-CTRL-09: Speed Control Loop", Tier::LowSpeed, low_speed::speed_control_loop),
        TestCase::new("TC-CTRL-ACCEL: Acceleration Control Loop", Tier::LowSpeed, low_speed::acceleration_control_loop),
        TestCase::new("TC-CTRL-01: Throttle Linearity", Tier::LowSpeed, low_speed::throttle_linearity),
        TestCase::new("TC-CTRL-04: Brake Linearity", Tier::LowSpeed, low_speed::brake_linearity),
        TestCase::new("TC-CTRL-02: Throttle Response Time", Tier::LowSpeed, low_speed::throttle_response_time),
        TestCase::new("TC-CTRL-05: Brake Response Time", Tier::LowSpeed, low_speed::brake_response_time),
        TestCase::new("TC-FUNC-03: Gear Protection Logic", Tier::LowSpeed, low_speed::gear_protection),
        TestCase::new("TC-CTRL-10: Staged Acceleration Performance", Tier::HighDynamic, high_dynamic::staged_acceleration),
        TestCase::new("TC-CTRL-06: Staged Braking Performance", Tier::HighDynamic, high_dynamic::staged_braking),
        TestCase::new("TC-CTRL-06: Emergency Braking from 30km/h", Tier::HighDynamic, high_dynamic::emergency_brake),
    ]
}

/// Base command with the parking brake released and DRIVE selected.
pub(crate) fn drive_command() -> ControlCommand {
    ControlCommand {
        parking_brake: false,
        gear_location: Gear::Drive,
        ..ControlCommand::safe_base()
    }
}

/// Runs `prepare_for_drive` and turns a refusal into a failing verdict.
pub(crate) async fn ensure_ready_to_drive(ctx: &TestContext) -> crate::error::HarnessResult<Option<Verdict>> {
    if ctx.prepare_for_drive().await? {
        Ok(None)
    } else {
        Ok(Some(Verdict::fail("Failed to prepare for drive.")))
    }
}

pub(crate) fn moving(fb: &ChassisFeedback) -> bool {
    fb.speed_mps > MOVING_THRESHOLD_MPS
}

pub(crate) fn stopped(fb: &ChassisFeedback) -> bool {
    fb.speed_mps < STOPPED_THRESHOLD_MPS
}

pub(crate) fn warn_operator(ctx: &TestContext, text: &str) {
    ctx.log(text, Style::Warning);
}

pub fn kmh_to_mps(kmh: f64) -> f64 {
    kmh / 3.6
}

pub(crate) fn secs_since(start: Instant) -> f64 {
    start.elapsed().as_secs_f64()
}

pub(crate) fn millis_since(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Polls settled feedback every ~30 ms until `reached` holds.
///
/// Returns the elapsed milliseconds since `start`, or `None` on timeout or abort.
pub(crate) async fn time_until<F>(ctx: &TestContext, start: Instant, timeout: Duration, mut reached: F) -> Option<f64>
where
    F: FnMut(&ChassisFeedback) -> bool + Send,
{
    while start.elapsed() < timeout {
        if ctx.is_aborted() {
            return None;
        }
        if let Some(fb) = ctx.feedback().await {
            if reached(&fb) {
                return Some(millis_since(start));
            }
        }
        time::sleep(RESPONSE_POLL_INTERVAL).await;
    }
    None
}
