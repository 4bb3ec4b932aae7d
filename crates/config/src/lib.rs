//! Engine configuration for Meridian.
//!
//! Loads the agent-engine knobs from a TOML file with environment
//! variable overrides, and validates them at startup. Everything has a
//! sensible default so an empty file (or no file) is a working
//! configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Knobs for the agent loop and the execution normalizer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Hard cap on LLM calls per conversation turn. The primary
    /// runaway-prevention device.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Retries for transient model-call failures before the turn fails.
    #[serde(default = "default_model_retries")]
    pub model_retries: u32,

    /// Backoff between model-call retries.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Default per-tool-call timeout in seconds. 0 disables the default
    /// (declarations may still carry their own).
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Interval between heartbeat events while a turn is running.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Wall-clock budget for a whole turn in seconds. 0 disables it.
    #[serde(default = "default_wall_clock_budget_secs")]
    pub wall_clock_budget_secs: u64,

    /// Default max tokens requested per model response.
    #[serde(default = "default_max_response_tokens")]
    pub max_response_tokens: u32,
}

fn default_max_iterations() -> u32 {
    10
}
fn default_model_retries() -> u32 {
    2
}
fn default_retry_backoff_ms() -> u64 {
    500
}
fn default_tool_timeout_secs() -> u64 {
    60
}
fn default_heartbeat_interval_secs() -> u64 {
    15
}
fn default_wall_clock_budget_secs() -> u64 {
    300
}
fn default_max_response_tokens() -> u32 {
    4096
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            model_retries: default_model_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            tool_timeout_secs: default_tool_timeout_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            wall_clock_budget_secs: default_wall_clock_budget_secs(),
            max_response_tokens: default_max_response_tokens(),
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file, apply `MERIDIAN_*` env overrides, validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus env overrides, for when no file exists.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `MERIDIAN_*` environment variable overrides. Unparseable
    /// values are ignored in favor of the existing setting.
    pub fn apply_env_overrides(&mut self) {
        override_u32(&mut self.max_iterations, "MERIDIAN_MAX_ITERATIONS");
        override_u32(&mut self.model_retries, "MERIDIAN_MODEL_RETRIES");
        override_u64(&mut self.retry_backoff_ms, "MERIDIAN_RETRY_BACKOFF_MS");
        override_u64(&mut self.tool_timeout_secs, "MERIDIAN_TOOL_TIMEOUT_SECS");
        override_u64(
            &mut self.heartbeat_interval_secs,
            "MERIDIAN_HEARTBEAT_INTERVAL_SECS",
        );
        override_u64(
            &mut self.wall_clock_budget_secs,
            "MERIDIAN_WALL_CLOCK_BUDGET_SECS",
        );
        override_u32(&mut self.max_response_tokens, "MERIDIAN_MAX_RESPONSE_TOKENS");
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "max_iterations must be at least 1".into(),
            ));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat_interval_secs must be at least 1".into(),
            ));
        }
        if self.max_response_tokens == 0 {
            return Err(ConfigError::Invalid(
                "max_response_tokens must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn override_u32(slot: &mut u32, var: &str) {
    if let Ok(value) = std::env::var(var)
        && let Ok(parsed) = value.parse()
    {
        *slot = parsed;
    }
}

fn override_u64(slot: &mut u64, var: &str) {
    if let Ok(value) = std::env::var(var)
        && let Ok(parsed) = value.parse()
    {
        *slot = parsed;
    }
}
