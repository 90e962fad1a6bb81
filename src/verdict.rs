use crate::analysis::{sentinel, ResponseMetrics};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Flag(bool),
    Number(f64),
    Text(String),
    Series(Vec<f64>),
}

impl MetricValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetricValue::Flag(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetricValue::Text(value) => Some(value),
            _ => None,
        }
    }
}

impl From<bool> for MetricValue {
    fn from(value: bool) -> Self {
        MetricValue::Flag(value)
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Number(value)
    }
}

impl From<u32> for MetricValue {
    fn from(value: u32) -> Self {
        MetricValue::Number(f64::from(value))
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        MetricValue::Text(value.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(value: String) -> Self {
        MetricValue::Text(value)
    }
}

impl From<Vec<f64>> for MetricValue {
    fn from(value: Vec<f64>) -> Self {
        MetricValue::Series(value)
    }
}

pub type Metrics = BTreeMap<String, MetricValue>;

/// Outcome of one test procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub pass: bool,
    pub detail: String,
    #[serde(default)]
    pub metrics: Metrics,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl Verdict {
    pub fn pass(detail: impl Into<String>) -> Self {
        Self::new(true, detail)
    }

    pub fn fail(detail: impl Into<String>) -> Self {
        Self::new(false, detail)
    }

    pub fn new(pass: bool, detail: impl Into<String>) -> Self {
        Self {
            pass,
            detail: detail.into(),
            metrics: Metrics::new(),
            warnings: Vec::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<MetricValue>) -> Self {
        self.metrics.insert(key.to_string(), value.into());
        self
    }

    /// Embeds the three step-response metrics, `-1` where not computed.
    pub fn with_response(self, metrics: &ResponseMetrics) -> Self {
        self.with("response_time_ms", sentinel(metrics.response_time_ms))
            .with("overshoot_percent", sentinel(metrics.overshoot_percent))
            .with("steady_state_error_percent", sentinel(metrics.steady_state_error_percent))
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn metric(&self, key: &str) -> Option<&MetricValue> {
        self.metrics.get(key)
    }

    pub fn status_text(&self) -> &'static str {
        if self.pass {
            "PASS"
        } else {
            "FAIL"
        }
    }
}

/// Named pass criteria; a failing verdict lists every criterion that did not hold.
#[derive(Debug, Default)]
pub struct Criteria {
    checks: Vec<(String, bool)>,
}

impl Criteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, name: impl Into<String>, ok: bool) -> &mut Self {
        self.checks.push((name.into(), ok));
        self
    }

    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|(_, ok)| *ok)
    }

    pub fn failed(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|(_, ok)| !*ok)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// `summary` on success, otherwise `summary` followed by the failed criteria.
    pub fn into_verdict(self, summary: &str) -> Verdict {
        if self.all_passed() {
            Verdict::pass(summary)
        } else {
            Verdict::fail(format!("{summary} | failed: {}", self.failed().join(", ")))
        }
    }
}
