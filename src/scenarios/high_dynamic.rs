use super::{drive_command, ensure_ready_to_drive, kmh_to_mps, millis_since, moving, secs_since, stopped, START_MOVING_TIMEOUT};
use crate::analysis::round_half_even;
use crate::console::Style;
use crate::context::TestContext;
use crate::orchestrator::ProcedureFuture;
use crate::verdict::Verdict;
use tokio::time::{self, Duration, Instant};

const STAGED_ACCEL_REQUEST: f64 = 3.0;
const STAGED_ACCEL_MARKS_KPH: [f64; 2] = [30.0, 60.0];
const STAGED_ACCEL_SEGMENT_TIMEOUT: Duration = Duration::from_secs(15);

const STAGED_BRAKE_SPEED_KPH: f64 = 60.0;
const STAGED_BRAKE_LEVELS: [f64; 2] = [50.0, 100.0];
const STAGED_BRAKE_REACH_TIMEOUT: Duration = Duration::from_secs(15);
const STAGED_BRAKE_STOP_TIMEOUT: Duration = Duration::from_secs(10);
const STAGED_BRAKE_RESET_HOLD: Duration = Duration::from_secs(2);

const EMERGENCY_SPEED_KPH: f64 = 30.0;
const EMERGENCY_REACH_TIMEOUT: Duration = Duration::from_secs(10);
const EMERGENCY_WINDOW: Duration = Duration::from_secs(2);
const EMERGENCY_FULL_BRAKE_PERCENT: f64 = 95.0;
const EMERGENCY_MAX_LATENCY_MS: f64 = 300.0;
const EMERGENCY_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Announces a high-dynamic manoeuvre and gives the operator time to abort.
async fn announce(ctx: &TestContext, warning: &str) -> bool {
    ctx.log(warning, Style::Warning);
    ctx.hold(ctx.config().high_dynamic_warning()).await
}

fn current_kph(ctx: &TestContext) -> f64 {
    ctx.latest().map_or(0.0, |fb| fb.speed_mps * 3.6)
}

/// TC-CTRL-10: 0-30 and 30-60 km/h segment times under a 3 m/s² request.
pub fn staged_acceleration(ctx: TestContext) -> ProcedureFuture {
    Box::pin(async move {
        if !announce(&ctx, "WARNING: High-speed acceleration test. ENSURE HUGE SAFE AREA!").await {
            return Ok(Verdict::fail("Aborted"));
        }
        if let Some(refused) = ensure_ready_to_drive(&ctx).await? {
            return Ok(refused);
        }

        let mut cmd = drive_command();
        cmd.acceleration = STAGED_ACCEL_REQUEST;
        ctx.send(&cmd)?;
        ctx.log("  Starting full acceleration...", Style::Plain);

        if !ctx.wait_for(moving, START_MOVING_TIMEOUT, "vehicle to start moving").await {
            return Ok(Verdict::fail("Vehicle did not move."));
        }

        let mut verdict = Verdict::pass("");
        let mut segments = Vec::new();
        let mut mark = Instant::now();
        let mut previous_kph = 0.0;
        for target_kph in STAGED_ACCEL_MARKS_KPH {
            ctx.log(&format!("  ...timing for {previous_kph}-{target_kph} km/h..."), Style::Plain);
            let target_mps = kmh_to_mps(target_kph);
            if !ctx
                .wait_for(
                    |fb| fb.speed_mps >= target_mps,
                    STAGED_ACCEL_SEGMENT_TIMEOUT,
                    &format!("reach {target_kph} km/h"),
                )
                .await
            {
                return Ok(Verdict::fail(format!(
                    "Timeout waiting to reach {target_kph} km/h. Max speed: {:.1} km/h",
                    current_kph(&ctx)
                )));
            }

            let segment = round_half_even(secs_since(mark), 2);
            mark = Instant::now();
            ctx.log(
                &format!("    -> {previous_kph}-{target_kph} km/h took: {segment:.2}s"),
                Style::Success,
            );
            verdict = verdict.with(&format!("time_{previous_kph}_to_{target_kph}_kph"), segment);
            segments.push(segment);
            previous_kph = target_kph;
        }

        verdict.detail = format!(
            "Staged acceleration test passed. 0-30: {}s, 30-60: {}s",
            segments[0], segments[1]
        );
        Ok(verdict)
    })
}

/// TC-CTRL-06: time to standstill from 60 km/h at 50 % and 100 % brake.
pub fn staged_braking(ctx: TestContext) -> ProcedureFuture {
    Box::pin(async move {
        if !announce(&ctx, "WARNING: High-speed braking test. ENSURE HUGE SAFE AREA!").await {
            return Ok(Verdict::fail("Aborted"));
        }

        let initial_mps = kmh_to_mps(STAGED_BRAKE_SPEED_KPH);
        let mut verdict = Verdict::pass("");
        let mut times = Vec::new();

        for brake in STAGED_BRAKE_LEVELS {
            ctx.log(
                &format!("\n--- Testing {brake}% Braking from {STAGED_BRAKE_SPEED_KPH} km/h ---"),
                Style::Info,
            );
            if ctx.is_aborted() {
                return Ok(Verdict::fail("Aborted"));
            }
            if !ctx.prepare_for_drive().await? {
                return Ok(Verdict::fail(format!("Failed to prepare for drive for {brake}% test.")));
            }

            let mut cmd = drive_command();
            cmd.speed = initial_mps + 2.0;
            ctx.send(&cmd)?;
            if !ctx
                .wait_for(
                    |fb| fb.speed_mps >= initial_mps,
                    STAGED_BRAKE_REACH_TIMEOUT,
                    &format!("reach {STAGED_BRAKE_SPEED_KPH} km/h"),
                )
                .await
            {
                return Ok(Verdict::fail(format!("Failed to reach speed for {brake}% braking test.")));
            }

            ctx.log(&format!("  At speed. Triggering {brake}% BRAKE!"), Style::Danger);
            cmd.speed = 0.0;
            cmd.throttle = 0.0;
            cmd.brake = brake;
            ctx.send(&cmd)?;
            let start = Instant::now();
            if !ctx.wait_for(stopped, STAGED_BRAKE_STOP_TIMEOUT, "decelerate to stop").await {
                return Ok(Verdict::fail(format!("Vehicle failed to stop during {brake}% braking test."))
                    .with("braking_time", "timeout"));
            }

            let braking_time = round_half_even(secs_since(start), 2);
            ctx.log(
                &format!("  -> {brake}% braking time from {STAGED_BRAKE_SPEED_KPH} km/h: {braking_time:.2}s"),
                Style::Success,
            );
            verdict = verdict.with(&format!("braking_time_from_60kph_{brake}pct"), braking_time);
            times.push(braking_time);

            ctx.reset_to_safe_state(STAGED_BRAKE_RESET_HOLD).await?;
        }

        verdict.detail = format!("Braking tests passed. 50%: {}s, 100%: {}s", times[0], times[1]);
        Ok(verdict)
    })
}

/// TC-CTRL-06: full brake from 30 km/h; latency to 95 % brake feedback.
pub fn emergency_brake(ctx: TestContext) -> ProcedureFuture {
    Box::pin(async move {
        if !announce(&ctx, "WARNING: High-speed braking test starting. ENSURE HUGE SAFE AREA!").await {
            return Ok(Verdict::fail("Aborted"));
        }
        if let Some(refused) = ensure_ready_to_drive(&ctx).await? {
            return Ok(refused);
        }

        let target_mps = kmh_to_mps(EMERGENCY_SPEED_KPH);
        let mut cmd = drive_command();
        cmd.speed = target_mps + 1.0;
        ctx.send(&cmd)?;
        ctx.log(&format!("  Accelerating to {EMERGENCY_SPEED_KPH} km/h..."), Style::Plain);
        if !ctx
            .wait_for(
                |fb| fb.speed_mps >= target_mps,
                EMERGENCY_REACH_TIMEOUT,
                &format!("reach {EMERGENCY_SPEED_KPH} km/h"),
            )
            .await
        {
            return Ok(Verdict::fail(format!(
                "Failed to reach {EMERGENCY_SPEED_KPH} km/h for braking test. Max speed: {:.1} km/h",
                current_kph(&ctx)
            )));
        }

        ctx.log(
            &format!("  At speed {:.1} km/h. Triggering 100% BRAKE!", current_kph(&ctx)),
            Style::Danger,
        );
        cmd.speed = 0.0;
        cmd.throttle = 0.0;
        cmd.brake = 100.0;
        let start = Instant::now();
        ctx.send(&cmd)?;

        let mut time_to_full_brake: Option<f64> = None;
        let mut max_brake = 0.0_f64;
        while start.elapsed() < EMERGENCY_WINDOW {
            if ctx.is_aborted() {
                return Ok(Verdict::fail("Aborted"));
            }
            let Some(fb) = ctx.feedback().await else {
                continue;
            };
            max_brake = max_brake.max(fb.brake_percentage);
            if time_to_full_brake.is_none() && fb.brake_percentage >= EMERGENCY_FULL_BRAKE_PERCENT {
                time_to_full_brake = Some(millis_since(start));
            }
            if stopped(&fb) {
                break;
            }
            time::sleep(EMERGENCY_POLL_INTERVAL).await;
        }

        let Some(latency) = time_to_full_brake else {
            return Ok(Verdict::fail(format!(
                "Did not reach {EMERGENCY_FULL_BRAKE_PERCENT}% brake within {}s. Max brake feedback: {max_brake:.1}%",
                EMERGENCY_WINDOW.as_secs()
            ))
            .with("time_to_max_brake_ms", -1.0)
            .with("max_brake_feedback", max_brake));
        };
        if latency > EMERGENCY_MAX_LATENCY_MS {
            return Ok(Verdict::fail(format!("Time to max brake {latency:.0}ms > {EMERGENCY_MAX_LATENCY_MS:.0}ms."))
                .with("time_to_max_brake_ms", latency)
                .with("max_brake_feedback", max_brake));
        }

        Ok(Verdict::pass(format!(
            "Emergency brake OK. Time to 95% brake: {latency:.0}ms. Max feedback: {max_brake:.1}%"
        ))
        .with("time_to_max_brake_ms", latency)
        .with("max_brake_feedback", max_brake))
    })
}
