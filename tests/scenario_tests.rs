use chassis_tester::*;
use chassis_tester::scenarios::{high_dynamic, low_speed, static_checks};
use std::sync::{Arc, Mutex};
use tokio::time::Duration;

fn sim_config(level: u8) -> HarnessConfig {
    HarnessConfig {
        level,
        reset_settle_ms: 500,
        inter_test_pause_ms: 200,
        high_dynamic_warning_ms: 0,
        monitor_release_ms: 500,
        ..HarnessConfig::default()
    }
}

struct SimRun {
    report: SuiteReport,
    sink: Arc<MemorySink>,
    cache: Arc<FeedbackCache>,
}

async fn run_against_sim(orchestrator: &mut Orchestrator, sim: SimConfig, input: ScriptedInput) -> SimRun {
    let cache = Arc::new(FeedbackCache::new(SessionClock::start()));
    let vehicle = Arc::new(SimulatedVehicle::spawn(sim, cache.clone()));
    let sink = Arc::new(MemorySink::new());

    let report = orchestrator
        .run(Harness {
            bus: vehicle,
            cache: cache.clone(),
            input: Box::new(input),
            sink: sink.clone(),
        })
        .await;

    SimRun { report, sink, cache }
}

fn with_takeover() -> SimConfig {
    SimConfig {
        takeover_after_secs: Some(4.0),
        ..SimConfig::default()
    }
}

fn single_case(level: u8, case: TestCase) -> Orchestrator {
    let mut orchestrator = Orchestrator::new(sim_config(level));
    orchestrator.register(case);
    orchestrator
}

#[tokio::test(start_paused = true)]
async fn test_static_tier_passes_on_simulated_vehicle() {
    let mut orchestrator = Orchestrator::with_standard_suite(sim_config(1));
    let run = run_against_sim(&mut orchestrator, with_takeover(), ScriptedInput::confirmed()).await;

    assert_eq!(run.report.outcome, SuiteOutcome::Completed);
    assert_eq!(run.report.results.len(), 5);
    for record in &run.report.results {
        assert!(record.verdict.pass, "{} failed: {}", record.name, record.verdict.detail);
    }

    let mode = run.report.result("TC-FUNC-01: Driving Mode Transition").unwrap();
    assert_eq!(mode.verdict.metric("disengage_reason_correct").and_then(MetricValue::as_bool), Some(true));

    let steering = run.report.result("TC-CTRL-07: Static Steering Performance").unwrap();
    let response = steering.verdict.metric("response_time_ms").and_then(MetricValue::as_f64).unwrap();
    assert!(response > 0.0 && response < 500.0);

    let signals = run.report.result("TC-SIG-ALL: All Signal Controls (Lights, Horn)").unwrap();
    assert_eq!(signals.verdict.metric("horn_off_ok").and_then(MetricValue::as_bool), Some(true));
}

#[tokio::test(start_paused = true)]
async fn test_mode_transition_fails_without_driver_takeover() {
    let mut orchestrator = single_case(
        1,
        TestCase::new("mode", Tier::Static, static_checks::driving_mode_transition),
    );
    let run = run_against_sim(&mut orchestrator, SimConfig::default(), ScriptedInput::confirmed()).await;

    let record = run.report.result("mode").unwrap();
    assert!(!record.verdict.pass);
    assert_eq!(record.verdict.detail, "Did not disengage to manual mode after intervention.");
    assert!(run.sink.contains("Timeout waiting for: disengagement to COMPLETE_MANUAL"));
}

#[tokio::test(start_paused = true)]
async fn test_gear_protection_rejects_reverse_while_moving() {
    let mut orchestrator = single_case(
        2,
        TestCase::new("gear protection", Tier::LowSpeed, low_speed::gear_protection),
    );
    let run = run_against_sim(&mut orchestrator, SimConfig::default(), ScriptedInput::confirmed()).await;

    let record = run.report.result("gear protection").unwrap();
    assert!(record.verdict.pass, "{}", record.verdict.detail);
    assert!(record.verdict.warnings.is_empty());
    assert_eq!(
        record.verdict.metric("error_code_reported").and_then(MetricValue::as_str),
        Some("CHASSIS_ERROR_ON_GEAR")
    );
}

#[tokio::test(start_paused = true)]
async fn test_gear_protection_warns_when_error_code_missing() {
    let mut orchestrator = single_case(
        2,
        TestCase::new("gear protection", Tier::LowSpeed, low_speed::gear_protection),
    );
    let sim = SimConfig {
        report_error_codes: false,
        ..SimConfig::default()
    };
    let run = run_against_sim(&mut orchestrator, sim, ScriptedInput::confirmed()).await;

    let record = run.report.result("gear protection").unwrap();
    assert!(record.verdict.pass, "{}", record.verdict.detail);
    assert_eq!(record.verdict.warnings.len(), 1);
    assert_eq!(
        record.verdict.metric("error_code_reported").and_then(MetricValue::as_str),
        Some("ABSENT")
    );
    assert_eq!(record.verdict.metric("gear_remains_unchanged").and_then(MetricValue::as_bool), Some(true));
}

/// Chassis that answers every command instantly and drops to NEUTRAL when
/// REVERSE is requested while rolling, without reporting an error code.
struct NeutralFallbackChassis {
    cache: Arc<FeedbackCache>,
    state: Mutex<ChassisFeedback>,
}

impl NeutralFallbackChassis {
    fn new(cache: Arc<FeedbackCache>) -> Self {
        let state = ChassisFeedback {
            parking_brake: true,
            ..ChassisFeedback::default()
        };
        cache.update(state.clone());
        Self {
            cache,
            state: Mutex::new(state),
        }
    }
}

impl CommandBus for NeutralFallbackChassis {
    fn publish(&self, command: &ControlCommand) -> Result<(), BusError> {
        let mut state = self.state.lock().unwrap();
        state.driving_mode = command.driving_mode;
        state.parking_brake = command.parking_brake;
        state.throttle_percentage = command.throttle;
        state.brake_percentage = command.brake;
        state.gear_location = if command.gear_location == Gear::Reverse && state.speed_mps > 0.5 {
            Gear::Neutral
        } else {
            command.gear_location
        };
        state.speed_mps = command.speed;
        self.cache.update(state.clone());
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_gear_protection_fails_when_gear_changes_to_neutral() {
    let mut orchestrator = single_case(
        2,
        TestCase::new("gear protection", Tier::LowSpeed, low_speed::gear_protection),
    );
    let cache = Arc::new(FeedbackCache::new(SessionClock::start()));
    let chassis = Arc::new(NeutralFallbackChassis::new(cache.clone()));

    let report = orchestrator
        .run(Harness {
            bus: chassis,
            cache,
            input: Box::new(ScriptedInput::confirmed()),
            sink: Arc::new(MemorySink::new()),
        })
        .await;

    let record = report.result("gear protection").unwrap();
    assert!(!record.verdict.pass);
    assert_eq!(
        record.verdict.detail,
        "Gear changed from D to N after a REVERSE request while moving forward."
    );
    assert_eq!(record.verdict.metric("gear_remains_unchanged").and_then(MetricValue::as_bool), Some(false));
    assert_eq!(record.verdict.metric("gear_after").and_then(MetricValue::as_str), Some("N"));
}

#[tokio::test(start_paused = true)]
async fn test_mode_transition_warns_when_reason_missing() {
    let mut orchestrator = single_case(
        1,
        TestCase::new("mode", Tier::Static, static_checks::driving_mode_transition),
    );
    let sim = SimConfig {
        report_error_codes: false,
        ..with_takeover()
    };
    let run = run_against_sim(&mut orchestrator, sim, ScriptedInput::confirmed()).await;

    let record = run.report.result("mode").unwrap();
    assert!(record.verdict.pass, "{}", record.verdict.detail);
    assert_eq!(record.verdict.detail, "Disengaged, but reason code is absent, not MANUAL_INTERVENTION.");
    assert_eq!(record.verdict.warnings.len(), 1);
    assert_eq!(record.verdict.metric("disengage_reason_correct").and_then(MetricValue::as_bool), Some(false));
}

#[tokio::test(start_paused = true)]
async fn test_speed_loop_holds_target() {
    let mut orchestrator = single_case(
        2,
        TestCase::new("speed loop", Tier::LowSpeed, low_speed::speed_control_loop),
    );
    let run = run_against_sim(&mut orchestrator, SimConfig::default(), ScriptedInput::confirmed()).await;

    let record = run.report.result("speed loop").unwrap();
    assert!(record.verdict.pass, "{}", record.verdict.detail);
    let error = record.verdict.metric("speed_error_mps").and_then(MetricValue::as_f64).unwrap();
    assert!(error <= 0.3);
}

#[tokio::test(start_paused = true)]
async fn test_acceleration_loop_needs_reported_acceleration() {
    let mut orchestrator = single_case(
        2,
        TestCase::new("accel", Tier::LowSpeed, low_speed::acceleration_control_loop),
    );
    let sim = SimConfig {
        report_acceleration: false,
        ..SimConfig::default()
    };
    let run = run_against_sim(&mut orchestrator, sim, ScriptedInput::confirmed()).await;

    let record = run.report.result("accel").unwrap();
    assert!(!record.verdict.pass);
    assert!(record.verdict.detail.starts_with("Acceleration response timeout."));
}

#[tokio::test(start_paused = true)]
async fn test_emergency_brake_reaches_full_pressure() {
    let mut orchestrator = single_case(
        3,
        TestCase::new("emergency", Tier::HighDynamic, high_dynamic::emergency_brake),
    );
    let run = run_against_sim(&mut orchestrator, SimConfig::default(), ScriptedInput::confirmed()).await;

    let record = run.report.result("emergency").unwrap();
    assert!(record.verdict.pass, "{}", record.verdict.detail);
    let latency = record.verdict.metric("time_to_max_brake_ms").and_then(MetricValue::as_f64).unwrap();
    assert!(latency > 0.0 && latency <= 300.0);
    let max_brake = record.verdict.metric("max_brake_feedback").and_then(MetricValue::as_f64).unwrap();
    assert!(max_brake >= 95.0);
}

#[tokio::test(start_paused = true)]
async fn test_high_dynamic_warning_can_be_aborted() {
    let mut config = sim_config(3);
    config.high_dynamic_warning_ms = 5000;
    let mut orchestrator = Orchestrator::new(config);
    orchestrator.register(TestCase::new("staged accel", Tier::HighDynamic, high_dynamic::staged_acceleration));
    orchestrator.register(TestCase::new("staged braking", Tier::HighDynamic, high_dynamic::staged_braking));

    let input = ScriptedInput::confirmed().press_at(Duration::from_secs(3), Key::Char(' '));
    let run = run_against_sim(&mut orchestrator, SimConfig::default(), input).await;

    assert_eq!(run.report.outcome, SuiteOutcome::Aborted);
    assert_eq!(run.report.results.len(), 1);
    assert_eq!(run.report.results[0].verdict.detail, "Aborted");
    assert_eq!(run.report.skipped, vec!["staged braking".to_string()]);
    assert!(run.sink.contains("WARNING: High-speed acceleration test. ENSURE HUGE SAFE AREA!"));

    // The vehicle never moved
    assert_eq!(run.cache.latest().map(|fb| fb.speed_mps), Some(0.0));
}

#[tokio::test(start_paused = true)]
async fn test_full_plan_completes_on_simulated_vehicle() {
    let mut orchestrator = Orchestrator::with_standard_suite(sim_config(3));
    let run = run_against_sim(&mut orchestrator, with_takeover(), ScriptedInput::confirmed()).await;

    assert_eq!(run.report.outcome, SuiteOutcome::Completed);
    assert_eq!(run.report.results.len(), 15);
    assert!(run.report.skipped.is_empty());
    assert!(run.report.passed() >= 12);

    let staged = run.report.result("TC-CTRL-10: Staged Acceleration Performance").unwrap();
    assert!(staged.verdict.metric("time_0_to_30_kph").is_some());
    assert!(run.sink.contains("--- All tests completed. ---"));
}
