use crate::error::{HarnessError, HarnessResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8090;
pub const MAX_LEVEL: u8 = 3;

/// Run parameters. Every field has a default so a config file may name any subset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub level: u8,
    pub host: String,
    pub port: u16,
    pub reset_settle_ms: u64,
    pub inter_test_pause_ms: u64,
    pub high_dynamic_warning_ms: u64,
    pub monitor_release_ms: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            level: 1,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            reset_settle_ms: 1000,
            inter_test_pause_ms: 2000,
            high_dynamic_warning_ms: 5000,
            monitor_release_ms: 1000,
        }
    }
}

impl HarnessConfig {
    pub fn load(path: &Path) -> HarnessResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| HarnessError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| HarnessError::Config(format!("invalid config {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> HarnessResult<()> {
        if self.level > MAX_LEVEL {
            return Err(HarnessError::Config(format!(
                "level {} out of range (0-{MAX_LEVEL})",
                self.level
            )));
        }
        if self.host.is_empty() {
            return Err(HarnessError::Config("host must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn reset_settle(&self) -> Duration {
        Duration::from_millis(self.reset_settle_ms)
    }

    pub fn inter_test_pause(&self) -> Duration {
        Duration::from_millis(self.inter_test_pause_ms)
    }

    pub fn high_dynamic_warning(&self) -> Duration {
        Duration::from_millis(self.high_dynamic_warning_ms)
    }

    pub fn monitor_release(&self) -> Duration {
        Duration::from_millis(self.monitor_release_ms)
    }
}
