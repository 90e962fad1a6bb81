//! Step-response metrics and series statistics.
//!
//! Metrics are computed from a `(t, value)` series captured around a command issued at
//! `T0`. Each metric is reported independently; one that cannot be computed is `None`
//! in memory and the `-1` sentinel on the wire and in verdicts.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::trace;

pub const NOT_COMPUTED: f64 = -1.0;
pub const STEADY_STATE_DELAY_SECS: f64 = 2.0;
const RESPONSE_FRACTION: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResponseMetrics {
    #[serde(serialize_with = "to_sentinel", deserialize_with = "from_sentinel")]
    pub response_time_ms: Option<f64>,
    #[serde(serialize_with = "to_sentinel", deserialize_with = "from_sentinel")]
    pub overshoot_percent: Option<f64>,
    #[serde(serialize_with = "to_sentinel", deserialize_with = "from_sentinel")]
    pub steady_state_error_percent: Option<f64>,
}

impl ResponseMetrics {
    pub const NONE: Self = Self {
        response_time_ms: None,
        overshoot_percent: None,
        steady_state_error_percent: None,
    };

    pub fn all_computed(&self) -> bool {
        self.response_time_ms.is_some()
            && self.overshoot_percent.is_some()
            && self.steady_state_error_percent.is_some()
    }

    /// `[response_time_ms, overshoot_percent, steady_state_error_percent]` with `-1` for
    /// anything not computed.
    pub fn sentinel_values(&self) -> [f64; 3] {
        [
            sentinel(self.response_time_ms),
            sentinel(self.overshoot_percent),
            sentinel(self.steady_state_error_percent),
        ]
    }
}

pub fn sentinel(value: Option<f64>) -> f64 {
    value.unwrap_or(NOT_COMPUTED)
}

fn to_sentinel<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(sentinel(*value))
}

fn from_sentinel<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let raw = f64::deserialize(deserializer)?;
    Ok((raw != NOT_COMPUTED).then_some(raw))
}

/// Computes t90 response time, overshoot and steady-state error of a step to `target`.
///
/// `series[0]` is taken as the pre-step value. Only samples at or after `command_time`
/// take part in the response, peak and steady-state calculations; the steady-state
/// window starts 2 s after the command.
pub fn compute_metrics(command_time: f64, series: &[(f64, f64)], target: f64, is_brake_profile: bool) -> ResponseMetrics {
    trace!(command_time, target, is_brake_profile, samples = series.len(), "computing step response metrics");

    let Some(&(_, initial)) = series.first() else {
        return ResponseMetrics::NONE;
    };

    let rising = target > initial;
    let threshold = initial + (target - initial) * RESPONSE_FRACTION;

    let response_time_ms = series
        .iter()
        .filter(|(t, _)| *t >= command_time)
        .find(|(_, value)| if rising { *value >= threshold } else { *value <= threshold })
        .map(|(t, _)| round_half_even((t - command_time) * 1000.0, 1));

    let relevant: Vec<(f64, f64)> = series.iter().copied().filter(|(t, _)| *t >= command_time).collect();
    if relevant.is_empty() {
        return ResponseMetrics {
            response_time_ms,
            ..ResponseMetrics::NONE
        };
    }

    let peak = if rising {
        relevant.iter().map(|(_, v)| *v).fold(f64::NEG_INFINITY, f64::max)
    } else {
        relevant.iter().map(|(_, v)| *v).fold(f64::INFINITY, f64::min)
    };
    let overshoot = if target == 0.0 {
        0.0
    } else {
        round_half_even((peak - target) / target * 100.0, 2)
    };

    let steady: Vec<f64> = relevant
        .iter()
        .filter(|(t, _)| *t > command_time + STEADY_STATE_DELAY_SECS)
        .map(|(_, v)| *v)
        .collect();
    let steady_state_error = mean(&steady).map(|avg| {
        if target == 0.0 {
            0.0
        } else {
            round_half_even((avg - target) / target * 100.0, 2)
        }
    });

    ResponseMetrics {
        response_time_ms,
        overshoot_percent: Some(overshoot),
        steady_state_error_percent: steady_state_error,
    }
}

/// Rounds to `decimals` places, ties to even.
pub fn round_half_even(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round_ties_even() / scale
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn population_std_dev(values: &[f64]) -> Option<f64> {
    let avg = mean(values)?;
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}
