//! Configuration system using Figment
//!
//! Settings are layered from, in increasing priority:
//! 1. Built-in defaults (the controller's RS-232 factory settings)
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `BTC_`
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! BTC_SERIAL__PORT=/dev/ttyUSB1
//! BTC_SERIAL__VERIFY_STATUS=true
//! BTC_LOGGER__INTERVAL_SECS=30
//! ```
//!
//! # Example
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyUSB0"
//! timeout_ms = 5000
//!
//! [logger]
//! interval_secs = 10.0
//! output = "bath.csv"
//! ```

use crate::error::{AppResult, BtcError};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Baud rate of the controller's RS-232 port (factory setting).
pub const DEFAULT_BAUD_RATE: u32 = 4800;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "BTC_";

/// Top-level settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Application-level settings
    pub application: ApplicationConfig,
    /// Serial link settings
    pub serial: SerialConfig,
    /// Periodic logger settings
    pub logger: LoggerConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Serial link configuration.
///
/// Line parameters other than the baud rate (even parity, 7 data bits,
/// 1 stop bit, RTS/CTS) are fixed by the controller and not configurable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SerialConfig {
    /// Port identifier (e.g. "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Response timeout in milliseconds
    pub timeout_ms: u64,
    /// Pause after each command in milliseconds
    pub command_delay_ms: u64,
    /// Query `status` after every command and fail on error messages
    pub verify_status: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: 5000,
            command_delay_ms: 50,
            verify_status: false,
        }
    }
}

impl SerialConfig {
    /// Response timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Inter-command pause as a [`Duration`].
    pub fn command_delay(&self) -> Duration {
        Duration::from_millis(self.command_delay_ms)
    }
}

/// Periodic logger configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggerConfig {
    /// Sampling interval in seconds
    pub interval_secs: f64,
    /// CSV file to append to; a timestamped name is generated if unset
    pub output: Option<PathBuf>,
    /// Stop after this many ticks; runs until interrupted if unset
    pub max_ticks: Option<u64>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10.0,
            output: None,
            max_ticks: None,
        }
    }
}

impl Settings {
    /// Load settings from defaults, an optional TOML file and the environment.
    ///
    /// An explicitly given file must exist.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            if !path.exists() {
                return Err(BtcError::Configuration(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }
        let settings: Settings = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(settings)
    }

    /// Check values that parse but make no sense.
    pub fn validate(&self) -> AppResult<()> {
        if self.serial.port.trim().is_empty() {
            return Err(BtcError::Configuration(
                "serial.port must not be empty".to_string(),
            ));
        }
        if self.serial.baud_rate == 0 {
            return Err(BtcError::Configuration(
                "serial.baud_rate must be positive".to_string(),
            ));
        }
        if !(self.logger.interval_secs.is_finite() && self.logger.interval_secs > 0.0) {
            return Err(BtcError::Configuration(format!(
                "logger.interval_secs must be positive, got {}",
                self.logger.interval_secs
            )));
        }
        Ok(())
    }
}
