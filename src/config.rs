//! Session configuration
//!
//! Loaded from TOML; every field has a default so partial files are valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{LocalizationError, LocalizationResult};
use crate::gate::GateConfig;

/// Errors raised while reading a configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Invalid(#[from] LocalizationError),
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of trace, debug, info, warn, error
    pub level: String,
    /// Include the module path in each line
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_target: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Delay between attempts until the first successful localization
    pub cold_retry_interval_ms: u64,
    /// Delay between attempts once any localization has succeeded
    pub steady_retry_interval_ms: u64,
    pub gate: GateConfig,
    pub logging: LoggingConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cold_retry_interval_ms: 100,
            steady_retry_interval_ms: 500,
            gate: GateConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SessionConfig {
    /// `<config dir>/xreal/relocalize.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("xreal")
            .join("relocalize.toml")
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config.normalized())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Load `path` if it exists, otherwise return the defaults
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Reject NaN anywhere in the gate and non-finite delta or tolerance.
    /// The floor may be infinite to turn it off.
    pub fn validate(&self) -> LocalizationResult<()> {
        let gate = &self.gate;
        for (name, value) in [
            ("gate.minimum_confidence_delta", gate.minimum_confidence_delta),
            ("gate.average_deviation_tolerance", gate.average_deviation_tolerance),
        ] {
            if !value.is_finite() {
                return Err(LocalizationError::invalid_parameter(name, value));
            }
        }
        if gate.absolute_minimum_confidence.is_nan() {
            return Err(LocalizationError::invalid_parameter(
                "gate.absolute_minimum_confidence",
                gate.absolute_minimum_confidence,
            ));
        }
        if self.cold_retry_interval_ms == 0 {
            return Err(LocalizationError::invalid_parameter(
                "cold_retry_interval_ms",
                self.cold_retry_interval_ms,
            ));
        }
        if self.steady_retry_interval_ms == 0 {
            return Err(LocalizationError::invalid_parameter(
                "steady_retry_interval_ms",
                self.steady_retry_interval_ms,
            ));
        }
        Ok(())
    }

    /// Copy with clampable values brought into range
    pub fn normalized(&self) -> Self {
        Self {
            gate: self.gate.normalized(),
            ..self.clone()
        }
    }

    pub fn cold_retry_interval(&self) -> Duration {
        Duration::from_millis(self.cold_retry_interval_ms)
    }

    pub fn steady_retry_interval(&self) -> Duration {
        Duration::from_millis(self.steady_retry_interval_ms)
    }
}
