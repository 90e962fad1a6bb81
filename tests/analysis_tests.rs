use chassis_tester::*;
use chassis_tester::analysis::sentinel;

#[test]
fn test_empty_series_computes_nothing() {
    let metrics = compute_metrics(0.0, &[], 50.0, false);

    assert_eq!(metrics, ResponseMetrics::NONE);
    assert_eq!(metrics.sentinel_values(), [-1.0, -1.0, -1.0]);
    assert!(!metrics.all_computed());
}

#[test]
fn test_rising_step_response() {
    let series = [(0.0, 0.0), (0.1, 46.0), (0.3, 55.0), (3.5, 50.0)];
    let metrics = compute_metrics(0.0, &series, 50.0, false);

    assert_eq!(metrics.response_time_ms, Some(100.0));
    assert_eq!(metrics.overshoot_percent, Some(10.0));
    assert_eq!(metrics.steady_state_error_percent, Some(0.0));
    assert!(metrics.all_computed());
}

#[test]
fn test_samples_before_command_are_ignored() {
    // 46 before the command must not count as the t90 crossing
    let series = [(0.0, 0.0), (0.5, 46.0), (1.0, 10.0), (1.2, 47.0), (3.5, 49.0)];
    let metrics = compute_metrics(1.0, &series, 50.0, false);

    assert_eq!(metrics.response_time_ms, Some(200.0));
    assert_eq!(metrics.overshoot_percent, Some(-2.0));
    assert_eq!(metrics.steady_state_error_percent, Some(-2.0));
}

#[test]
fn test_no_threshold_crossing() {
    let series = [(0.0, 0.0), (0.5, 20.0), (1.0, 30.0), (3.0, 40.0)];
    let metrics = compute_metrics(0.0, &series, 50.0, false);

    assert_eq!(metrics.response_time_ms, None);
    assert_eq!(metrics.overshoot_percent, Some(-20.0));
    assert_eq!(metrics.steady_state_error_percent, Some(-20.0));
    assert_eq!(metrics.sentinel_values()[0], NOT_COMPUTED);
}

#[test]
fn test_no_steady_state_window() {
    let series = [(0.0, 0.0), (0.1, 50.0), (1.5, 50.0)];
    let metrics = compute_metrics(0.0, &series, 50.0, false);

    assert_eq!(metrics.response_time_ms, Some(100.0));
    assert_eq!(metrics.overshoot_percent, Some(0.0));
    assert_eq!(metrics.steady_state_error_percent, None);
}

#[test]
fn test_zero_target_reports_zero_percentages() {
    let series = [(0.0, 10.0), (0.2, 0.5), (2.5, 0.0)];
    let metrics = compute_metrics(0.0, &series, 0.0, true);

    // Falling to 0: threshold is 1.0
    assert_eq!(metrics.response_time_ms, Some(200.0));
    assert_eq!(metrics.overshoot_percent, Some(0.0));
    assert_eq!(metrics.steady_state_error_percent, Some(0.0));
}

#[test]
fn test_falling_step_uses_minimum_as_peak() {
    let series = [(0.0, 100.0), (0.05, 80.0), (0.2, 54.0), (0.4, 45.0), (2.5, 50.0), (3.0, 50.0)];
    let metrics = compute_metrics(0.0, &series, 50.0, false);

    // threshold = 100 + (50 - 100) * 0.9 = 55
    assert_eq!(metrics.response_time_ms, Some(200.0));
    assert_eq!(metrics.overshoot_percent, Some(-10.0));
    assert_eq!(metrics.steady_state_error_percent, Some(0.0));
}

#[test]
fn test_sentinel_serialization() {
    let metrics = ResponseMetrics {
        response_time_ms: Some(120.0),
        overshoot_percent: None,
        steady_state_error_percent: Some(0.5),
    };

    let json = serde_json::to_value(metrics).unwrap();
    assert_eq!(json["response_time_ms"], 120.0);
    assert_eq!(json["overshoot_percent"], -1.0);

    let decoded: ResponseMetrics = serde_json::from_value(json).unwrap();
    assert_eq!(decoded, metrics);
    assert_eq!(sentinel(None), -1.0);
}

#[test]
fn test_round_half_even() {
    assert_eq!(round_half_even(2.5, 0), 2.0);
    assert_eq!(round_half_even(3.5, 0), 4.0);
    assert_eq!(round_half_even(0.125, 2), 0.12);
    assert_eq!(round_half_even(1.2345, 1), 1.2);
    assert_eq!(round_half_even(-2.5, 0), -2.0);
}

#[test]
fn test_mean_and_population_std_dev() {
    assert_eq!(mean(&[]), None);
    assert_eq!(population_std_dev(&[]), None);

    let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
    assert_eq!(mean(&values), Some(5.0));
    assert_eq!(population_std_dev(&values), Some(2.0));
    assert_eq!(population_std_dev(&[3.0]), Some(0.0));
}
