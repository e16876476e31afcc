//! Configuration types for the engine, the compute channel, and the store.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid settings file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Configuration for the schedule engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Tasks with positive total float at or below this many work days are at risk.
    pub at_risk_float_days: i64,
    /// Verbosity level: 0=silent, 1=changes, 2=checks, 3=debug.
    pub verbosity: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            at_risk_float_days: 2,
            verbosity: 0,
        }
    }
}

/// Configuration for the compute channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Upper bound on the INITIALIZE handshake, in milliseconds.
    pub init_timeout_ms: u64,
}

impl ChannelConfig {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            init_timeout_ms: 10_000,
        }
    }
}

/// Configuration for the project store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum number of undoable actions retained by the history ledger.
    pub history_limit: usize,
    /// Label prefix for composite field edits (e.g. "Edit task").
    pub composite_label: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            history_limit: 100,
            composite_label: "Edit task".to_string(),
        }
    }
}

/// All settings, as read from a TOML file with `[engine]`, `[channel]` and
/// `[store]` tables. Missing tables and keys fall back to defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub engine: EngineConfig,
    pub channel: ChannelConfig,
    pub store: StoreConfig,
}

impl Settings {
    /// Parse and validate settings from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.at_risk_float_days < 0 {
            return Err(ConfigError::Invalid {
                field: "engine.at_risk_float_days",
                reason: "must not be negative".to_string(),
            });
        }
        if self.channel.init_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "channel.init_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.store.history_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "store.history_limit",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
