use super::{
    drive_command, ensure_ready_to_drive, moving, secs_since, stopped, time_until, warn_operator, START_MOVING_TIMEOUT,
};
use crate::analysis::{mean, population_std_dev, round_half_even};
use crate::console::Style;
use crate::context::TestContext;
use crate::error::{HarnessError, HarnessResult};
use crate::orchestrator::ProcedureFuture;
use crate::protocol::{ControlCommand, Gear};
use crate::verdict::Verdict;
use tokio::time::{self, Duration, Instant};

const SPEED_LOOP_TARGET_MPS: f64 = 2.0;
const SPEED_LOOP_REACH_TIMEOUT: Duration = Duration::from_secs(10);
const SPEED_LOOP_SETTLE: Duration = Duration::from_secs(1);
const SPEED_LOOP_WINDOW: Duration = Duration::from_secs(5);
const SPEED_LOOP_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);
const SPEED_LOOP_MAX_ERROR_MPS: f64 = 0.3;
const SPEED_LOOP_STOP_TIMEOUT: Duration = Duration::from_secs(8);

const ACCEL_TARGET: f64 = 1.0;
const ACCEL_SPEED_CAP_MPS: f64 = 20.0;
const ACCEL_RESPONSE_TIMEOUT: Duration = Duration::from_secs(3);
const ACCEL_MAX_RESPONSE_MS: f64 = 400.0;
const ACCEL_WINDOW: Duration = Duration::from_secs(4);
const ACCEL_SAMPLE_INTERVAL: Duration = Duration::from_millis(50);
const ACCEL_MIN_SAMPLES: usize = 20;
const ACCEL_MAX_ERROR: f64 = 0.15;
const ACCEL_MAX_STD_DEV: f64 = 0.2;
const ACCEL_STALL_SPEED_MPS: f64 = 0.05;
const ACCEL_STALL_GRACE: Duration = Duration::from_secs(2);

const LINEARITY_SETTLE: Duration = Duration::from_secs(4);
const THROTTLE_LINEARITY_TOLERANCE: f64 = 2.0;
const BRAKE_LINEARITY_TOLERANCE: f64 = 3.0;
const BRAKE_LINEARITY_ROLL_THROTTLE: f64 = 10.0;
const BRAKE_LINEARITY_ROLL_TIME: Duration = Duration::from_secs(2);

const PEDAL_STEP_PERCENT: f64 = 50.0;
const PEDAL_RESPONSE_FRACTION: f64 = 0.9;
const PEDAL_RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);
const THROTTLE_MAX_RESPONSE_MS: f64 = 200.0;
const BRAKE_MAX_RESPONSE_MS: f64 = 180.0;
const BRAKE_TEST_SPEED_MPS: f64 = 1.5;
const GEAR_PROTECTION_SPEED_MPS: f64 = 1.4;
const TEST_SPEED_REACHED_MPS: f64 = 1.0;
const TEST_SPEED_TIMEOUT: Duration = Duration::from_secs(5);
const GEAR_PROTECTION_OBSERVE: Duration = Duration::from_secs(2);

/// TC-CTRL-09: accelerate to 2 m/s, hold, then stop on the speed loop alone.
pub fn speed_control_loop(ctx: TestContext) -> ProcedureFuture {
    Box::pin(async move {
        if let Some(refused) = ensure_ready_to_drive(&ctx).await? {
            return Ok(refused);
        }

        let mut cmd = drive_command();
        ctx.log(&format!("  Stage 1: Accelerating to {SPEED_LOOP_TARGET_MPS} m/s..."), Style::Plain);
        cmd.speed = SPEED_LOOP_TARGET_MPS;
        ctx.send(&cmd)?;

        if !ctx.wait_for(moving, START_MOVING_TIMEOUT, "vehicle to start moving").await {
            return Ok(Verdict::fail("Vehicle did not move."));
        }
        let start = Instant::now();
        if !ctx
            .wait_for(
                |fb| fb.speed_mps >= SPEED_LOOP_TARGET_MPS,
                SPEED_LOOP_REACH_TIMEOUT,
                &format!("reach target speed {SPEED_LOOP_TARGET_MPS} m/s"),
            )
            .await
        {
            return Ok(Verdict::fail("Failed to reach target speed.").with("acceleration_time_sec", "timeout"));
        }
        let acceleration_time = secs_since(start);
        ctx.log(
            &format!("    -> Acceleration time to {SPEED_LOOP_TARGET_MPS} m/s: {acceleration_time:.2}s"),
            Style::Success,
        );

        ctx.log("  Stage 2: Maintaining speed for 5 seconds...", Style::Plain);
        if !ctx.hold(SPEED_LOOP_SETTLE).await {
            return Ok(Verdict::fail("Aborted"));
        }
        let mut readings = Vec::new();
        let window_start = Instant::now();
        while window_start.elapsed() < SPEED_LOOP_WINDOW {
            if ctx.is_aborted() {
                return Ok(Verdict::fail("Aborted"));
            }
            if let Some(fb) = ctx.feedback().await {
                readings.push(fb.speed_mps);
            }
            time::sleep(SPEED_LOOP_SAMPLE_INTERVAL).await;
        }
        let Some(avg_speed) = mean(&readings) else {
            return Ok(Verdict::fail("No chassis feedback during steady-speed window."));
        };
        let speed_error = (avg_speed - SPEED_LOOP_TARGET_MPS).abs();
        ctx.log(
            &format!("    -> Average stable speed: {avg_speed:.2} m/s, Error: {speed_error:.2} m/s"),
            Style::Plain,
        );
        if speed_error > SPEED_LOOP_MAX_ERROR_MPS {
            return Ok(Verdict::fail(format!(
                "Speed control steady-state error ({speed_error:.2}m/s) exceeds {SPEED_LOOP_MAX_ERROR_MPS}m/s."
            ))
            .with("acceleration_time_sec", acceleration_time)
            .with("speed_error_mps", speed_error));
        }

        ctx.log("  Stage 3: Decelerating to 0 m/s...", Style::Plain);
        cmd.speed = 0.0;
        ctx.send(&cmd)?;
        let decel_start = Instant::now();
        if !ctx.wait_for(stopped, SPEED_LOOP_STOP_TIMEOUT, "decelerate to stop").await {
            return Ok(Verdict::fail("Failed to decelerate to a stop.")
                .with("acceleration_time_sec", acceleration_time)
                .with("speed_error_mps", speed_error)
                .with("deceleration_time_sec", "timeout"));
        }
        let deceleration_time = secs_since(decel_start);
        ctx.log(&format!("    -> Deceleration time: {deceleration_time:.2}s"), Style::Success);

        Ok(Verdict::pass(format!(
            "Accel Time: {acceleration_time:.2}s, Speed Err: {speed_error:.3}m/s, Decel Time: {deceleration_time:.2}s"
        ))
        .with("acceleration_time_sec", acceleration_time)
        .with("speed_error_mps", speed_error)
        .with("deceleration_time_sec", deceleration_time))
    })
}

/// TC-CTRL-ACCEL: constant 1 m/s² request; response, tracking error and stability.
pub fn acceleration_control_loop(ctx: TestContext) -> ProcedureFuture {
    Box::pin(async move {
        if let Some(refused) = ensure_ready_to_drive(&ctx).await? {
            return Ok(refused);
        }

        let mut cmd = drive_command();
        cmd.speed = ACCEL_SPEED_CAP_MPS;
        ctx.log(
            &format!("  Commanding constant acceleration of {ACCEL_TARGET:.2} m/s^2..."),
            Style::Plain,
        );
        cmd.acceleration = ACCEL_TARGET;

        let threshold = ACCEL_TARGET * PEDAL_RESPONSE_FRACTION;
        let start = Instant::now();
        ctx.send(&cmd)?;
        let Some(response_time) = time_until(&ctx, start, ACCEL_RESPONSE_TIMEOUT, |fb| {
            fb.instantaneous_acceleration.is_some_and(|a| a >= threshold)
        })
        .await
        else {
            return Ok(Verdict::fail(format!(
                "Acceleration response timeout. Did not reach {threshold:.2} m/s^2."
            )));
        };
        ctx.log(
            &format!("    -> Response time to 90% target accel: {response_time:.0}ms"),
            Style::Success,
        );
        if response_time > ACCEL_MAX_RESPONSE_MS {
            return Ok(Verdict::fail(format!("Response time {response_time:.0}ms > {ACCEL_MAX_RESPONSE_MS:.0}ms."))
                .with("response_time_ms", response_time));
        }

        ctx.log(
            &format!(
                "  Maintaining target acceleration for {}s for stability analysis...",
                ACCEL_WINDOW.as_secs()
            ),
            Style::Plain,
        );
        let mut readings = Vec::new();
        let window_start = Instant::now();
        while window_start.elapsed() < ACCEL_WINDOW {
            if ctx.is_aborted() {
                return Ok(Verdict::fail("Aborted"));
            }
            let frame = ctx.feedback().await;
            if let Some(fb) = &frame {
                if let (true, Some(accel)) = (moving(fb), fb.instantaneous_acceleration) {
                    readings.push(accel);
                }
                if fb.speed_mps < ACCEL_STALL_SPEED_MPS && window_start.elapsed() > ACCEL_STALL_GRACE {
                    break;
                }
            }
            time::sleep(ACCEL_SAMPLE_INTERVAL).await;
        }

        if readings.len() < ACCEL_MIN_SAMPLES {
            return Ok(Verdict::fail(format!(
                "Not enough data points collected for stability analysis (collected {}).",
                readings.len()
            )));
        }
        let (Some(avg_accel), Some(std_dev)) = (mean(&readings), population_std_dev(&readings)) else {
            return Ok(Verdict::fail("No acceleration samples."));
        };
        let tracking_error = avg_accel - ACCEL_TARGET;
        ctx.log(
            &format!("    -> Avg Accel: {avg_accel:.3} m/s^2 (Error: {tracking_error:+.3})"),
            Style::Success,
        );
        ctx.log(&format!("    -> Stability (StdDev): {std_dev:.3}"), Style::Success);

        let annotate = |v: Verdict| {
            v.with("response_time_ms", response_time)
                .with("steady_state_error", round_half_even(tracking_error, 3))
                .with("stability_stddev", round_half_even(std_dev, 3))
        };
        if tracking_error.abs() > ACCEL_MAX_ERROR {
            return Ok(annotate(Verdict::fail(format!(
                "Tracking error {:.3} > {ACCEL_MAX_ERROR} m/s^2.",
                tracking_error.abs()
            ))));
        }
        if std_dev > ACCEL_MAX_STD_DEV {
            return Ok(annotate(Verdict::fail(format!(
                "Poor stability. StdDev {std_dev:.3} > {ACCEL_MAX_STD_DEV}."
            ))));
        }
        Ok(annotate(Verdict::pass("Acceleration control tracking test passed.")))
    })
}

#[derive(Clone, Copy)]
enum Pedal {
    Throttle,
    Brake,
}

impl Pedal {
    fn name(self) -> &'static str {
        match self {
            Pedal::Throttle => "throttle",
            Pedal::Brake => "brake",
        }
    }
}

/// Steps one pedal 0..80 % in 10 % increments and checks feedback after each settle.
async fn pedal_linearity(
    ctx: &TestContext,
    pedal: Pedal,
    tolerance: f64,
    mut cmd: ControlCommand,
) -> HarnessResult<Verdict> {
    let mut commanded = Vec::new();
    let mut feedback = Vec::new();
    let mut max_error = 0.0_f64;

    for step in 0..=8u32 {
        if ctx.is_aborted() {
            return Ok(Verdict::fail("Aborted"));
        }
        let request = f64::from(step * 10);
        match pedal {
            Pedal::Throttle => cmd.throttle = request,
            Pedal::Brake => cmd.brake = request,
        }
        ctx.send(&cmd)?;
        if !ctx.hold(LINEARITY_SETTLE).await {
            return Ok(Verdict::fail("Aborted"));
        }

        let fb = ctx
            .feedback()
            .await
            .ok_or_else(|| HarnessError::NoFeedback(format!("{} linearity", pedal.name())))?;
        let measured = match pedal {
            Pedal::Throttle => fb.throttle_percentage,
            Pedal::Brake => fb.brake_percentage,
        };
        let error = (measured - request).abs();
        ctx.log(
            &format!("  CMD: {request:3.0}% -> FDBK: {measured:5.1}%, Error: {error:4.1}%"),
            Style::Plain,
        );
        commanded.push(request);
        feedback.push(measured);
        max_error = max_error.max(error);

        if error > tolerance {
            return Ok(Verdict::fail(format!(
                "Error {error:.1}% > {tolerance:.1}% at {request}% {}.",
                pedal.name()
            ))
            .with("command_values", commanded)
            .with("feedback_values", feedback)
            .with("max_error", max_error));
        }
    }

    let label = match pedal {
        Pedal::Throttle => "Throttle",
        Pedal::Brake => "Brake",
    };
    Ok(Verdict::pass(format!("{label} linearity test passed. Max error: {max_error:.2}%"))
        .with("command_values", commanded)
        .with("feedback_values", feedback)
        .with("max_error", max_error))
}

/// TC-CTRL-01
pub fn throttle_linearity(ctx: TestContext) -> ProcedureFuture {
    Box::pin(async move {
        warn_operator(
            &ctx,
            "WARNING: This test will engage throttle. Ensure vehicle is on a dyno or in a safe, clear area.",
        );
        if let Some(refused) = ensure_ready_to_drive(&ctx).await? {
            return Ok(refused);
        }
        pedal_linearity(&ctx, Pedal::Throttle, THROTTLE_LINEARITY_TOLERANCE, drive_command()).await
    })
}

/// TC-CTRL-04: rolls the vehicle briefly, then sweeps the brake.
pub fn brake_linearity(ctx: TestContext) -> ProcedureFuture {
    Box::pin(async move {
        if let Some(refused) = ensure_ready_to_drive(&ctx).await? {
            return Ok(refused);
        }

        let mut cmd = drive_command();
        cmd.throttle = BRAKE_LINEARITY_ROLL_THROTTLE;
        ctx.send(&cmd)?;
        if !ctx.hold(BRAKE_LINEARITY_ROLL_TIME).await {
            return Ok(Verdict::fail("Aborted"));
        }
        cmd.throttle = 0.0;
        ctx.send(&cmd)?;

        pedal_linearity(&ctx, Pedal::Brake, BRAKE_LINEARITY_TOLERANCE, cmd).await
    })
}

/// TC-CTRL-02
pub fn throttle_response_time(ctx: TestContext) -> ProcedureFuture {
    Box::pin(async move {
        if let Some(refused) = ensure_ready_to_drive(&ctx).await? {
            return Ok(refused);
        }

        let mut cmd = drive_command();
        ctx.send(&cmd)?;
        if !ctx.hold(Duration::from_secs(1)).await {
            return Ok(Verdict::fail("Aborted"));
        }

        let threshold = PEDAL_STEP_PERCENT * PEDAL_RESPONSE_FRACTION;
        cmd.throttle = PEDAL_STEP_PERCENT;
        let start = Instant::now();
        ctx.send(&cmd)?;
        let response = time_until(&ctx, start, PEDAL_RESPONSE_TIMEOUT, |fb| fb.throttle_percentage >= threshold).await;

        Ok(judge_pedal_response("throttle", threshold, response, THROTTLE_MAX_RESPONSE_MS))
    })
}

/// TC-CTRL-05: brake step applied while rolling at low speed.
pub fn brake_response_time(ctx: TestContext) -> ProcedureFuture {
    Box::pin(async move {
        if let Some(refused) = ensure_ready_to_drive(&ctx).await? {
            return Ok(refused);
        }

        ctx.log("  Bringing vehicle to low speed for brake test...", Style::Plain);
        let mut cmd = drive_command();
        cmd.speed = BRAKE_TEST_SPEED_MPS;
        ctx.send(&cmd)?;
        if !ctx
            .wait_for(
                |fb| fb.speed_mps > TEST_SPEED_REACHED_MPS,
                TEST_SPEED_TIMEOUT,
                "vehicle to reach >1.0 m/s",
            )
            .await
        {
            return Ok(Verdict::fail("Vehicle failed to reach testing speed."));
        }

        // Release the speed request without braking
        cmd.speed = 0.0;
        ctx.send(&cmd)?;
        if !ctx.hold(Duration::from_secs(1)).await {
            return Ok(Verdict::fail("Aborted"));
        }

        let threshold = PEDAL_STEP_PERCENT * PEDAL_RESPONSE_FRACTION;
        ctx.log(&format!("  Applying {PEDAL_STEP_PERCENT}% brake step command..."), Style::Plain);
        cmd.brake = PEDAL_STEP_PERCENT;
        let start = Instant::now();
        ctx.send(&cmd)?;
        let response = time_until(&ctx, start, PEDAL_RESPONSE_TIMEOUT, |fb| fb.brake_percentage >= threshold).await;

        Ok(judge_pedal_response("brake", threshold, response, BRAKE_MAX_RESPONSE_MS))
    })
}

fn judge_pedal_response(pedal: &str, threshold: f64, response: Option<f64>, limit_ms: f64) -> Verdict {
    match response {
        None => Verdict::fail(format!(
            "Did not reach {threshold}% {pedal} within {}s.",
            PEDAL_RESPONSE_TIMEOUT.as_secs()
        )),
        Some(ms) if ms > limit_ms => {
            Verdict::fail(format!("Response time {ms:.0}ms > {limit_ms:.0}ms.")).with("response_time_ms", ms)
        }
        Some(ms) => Verdict::pass(format!("Response time to {threshold}% {pedal} is {ms:.0}ms."))
            .with("response_time_ms", ms),
    }
}

/// TC-FUNC-03: REVERSE requested while rolling forward must be refused.
pub fn gear_protection(ctx: TestContext) -> ProcedureFuture {
    Box::pin(async move {
        if let Some(refused) = ensure_ready_to_drive(&ctx).await? {
            return Ok(refused);
        }

        let mut cmd = drive_command();
        cmd.speed = GEAR_PROTECTION_SPEED_MPS;
        ctx.send(&cmd)?;
        if !ctx
            .wait_for(
                |fb| fb.speed_mps > TEST_SPEED_REACHED_MPS,
                TEST_SPEED_TIMEOUT,
                "vehicle to reach >1.0 m/s",
            )
            .await
        {
            return Ok(Verdict::fail("Vehicle failed to reach testing speed."));
        }

        let Some(before) = ctx.feedback().await else {
            return Ok(Verdict::fail("No chassis feedback."));
        };
        let gear_before = before.gear_location;
        ctx.log(
            &format!(
                "  Vehicle at {:.1} m/s in {gear_before}. Attempting to shift to REVERSE...",
                before.speed_mps
            ),
            Style::Plain,
        );
        cmd.gear_location = Gear::Reverse;
        ctx.send(&cmd)?;
        if !ctx.hold(GEAR_PROTECTION_OBSERVE).await {
            return Ok(Verdict::fail("Aborted"));
        }

        let Some(fb) = ctx.feedback().await else {
            return Ok(Verdict::fail("No chassis feedback."));
        };
        if fb.gear_location != gear_before {
            return Ok(Verdict::fail(format!(
                "Gear changed from {gear_before} to {} after a REVERSE request while moving forward.",
                fb.gear_location
            ))
            .with("gear_remains_unchanged", false)
            .with("gear_before", gear_before.to_string())
            .with("gear_after", fb.gear_location.to_string()));
        }

        let reported = fb.error_reported();
        let code = fb.error_code.map_or_else(|| "ABSENT".to_string(), |c| c.to_string());
        ctx.log(
            &format!(
                "  Gear remained in {}. Error code: {code} ({})",
                fb.gear_location,
                if reported { "Reported" } else { "Not Reported" }
            ),
            Style::Plain,
        );

        let verdict = Verdict::pass("Gear shift to REVERSE was correctly rejected while moving forward.")
            .with("gear_remains_unchanged", true)
            .with("error_code_reported", code);
        if reported {
            Ok(verdict)
        } else {
            let warning = "Gear shift was rejected, but no specific error code was reported.";
            warn_operator(&ctx, &format!("  Warning: {warning}"));
            Ok(verdict.with_warning(warning))
        }
    })
}
