use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::core::error::ConfigError;

/// Response stabilization settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwaitConfig {
    /// Give up waiting for a new response after this long
    pub timeout_ms: u64,
    /// Consecutive unchanged checks before a response counts as complete
    pub stability_checks: u32,
    /// Minimum spacing between two stability checks
    pub stability_interval_ms: u64,
}

impl Default for AwaitConfig {
    fn default() -> Self {
        AwaitConfig {
            timeout_ms: 60_000,
            stability_checks: 3,
            stability_interval_ms: 300,
        }
    }
}

impl AwaitConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn stability_interval(&self) -> Duration {
        Duration::from_millis(self.stability_interval_ms)
    }
}

/// Revert retry settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RevertConfig {
    pub max_attempts: u32,
    pub attempt_interval_ms: u64,
    /// Attempt number from which an unchanged resolved count switches the
    /// engine to a document-wide scan
    pub stall_after_attempts: u32,
    /// Shortest location component token worth matching on its own
    pub min_component_len: usize,
}

impl Default for RevertConfig {
    fn default() -> Self {
        RevertConfig {
            max_attempts: 5,
            attempt_interval_ms: 400,
            stall_after_attempts: 2,
            min_component_len: 4,
        }
    }
}

/// Workflow timings and limits
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub await_response: AwaitConfig,
    pub revert: RevertConfig,
    /// Window during which a second submit is suppressed
    pub dispatch_guard_ms: u64,
    /// Delay before a finished run's mappings are dropped
    pub clear_delay_ms: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        WorkflowConfig {
            await_response: AwaitConfig::default(),
            revert: RevertConfig::default(),
            dispatch_guard_ms: 3_000,
            clear_delay_ms: 2_000,
        }
    }
}

impl WorkflowConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: WorkflowConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading workflow config {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("parsing workflow config {}", path.display()))
    }

    /// Defaults overridden by `PROMPTVEIL_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(v) = env_number("PROMPTVEIL_RESPONSE_TIMEOUT_MS")? {
            config.await_response.timeout_ms = v;
        }
        if let Some(v) = env_u32("PROMPTVEIL_REVERT_ATTEMPTS")? {
            config.revert.max_attempts = v;
        }
        if let Some(v) = env_number("PROMPTVEIL_REVERT_INTERVAL_MS")? {
            config.revert.attempt_interval_ms = v;
        }
        if let Some(v) = env_u32("PROMPTVEIL_STALL_AFTER")? {
            config.revert.stall_after_attempts = v;
        }
        if let Some(v) = env_number("PROMPTVEIL_CLEAR_DELAY_MS")? {
            config.clear_delay_ms = v;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.revert.max_attempts == 0 {
            return Err(ConfigError::Invalid("revert.max_attempts must be at least 1".into()));
        }
        if self.await_response.stability_checks == 0 {
            return Err(ConfigError::Invalid(
                "await_response.stability_checks must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn dispatch_guard(&self) -> Duration {
        Duration::from_millis(self.dispatch_guard_ms)
    }

    pub fn clear_delay(&self) -> Duration {
        Duration::from_millis(self.clear_delay_ms)
    }
}

fn env_number(key: &'static str) -> Result<Option<u64>, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { key, value }),
        Err(_) => Ok(None),
    }
}

fn env_u32(key: &'static str) -> Result<Option<u32>, ConfigError> {
    env_number(key)?
        .map(|v| {
            u32::try_from(v).map_err(|_| ConfigError::InvalidEnv {
                key,
                value: v.to_string(),
            })
        })
        .transpose()
}
