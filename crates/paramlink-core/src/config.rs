//! Configuration for paramlink.
//!
//! Everything is loaded once at startup from an optional TOML file and is
//! immutable afterwards. Every section is optional; missing sections fall back
//! to the defaults below, and a missing `[[parameters]]` table falls back to
//! the built-in user camera table.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::logging::LogConfig;
use crate::range_policy::DEFAULT_SENSITIVITY_DIVISOR;

/// Default HTTP/WebSocket listen host.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default HTTP/WebSocket listen port.
pub const DEFAULT_PORT: u16 = 8888;
/// Default OSC destination.
pub const DEFAULT_OSC_TARGET: &str = "127.0.0.1:9000";
/// Default per-address throttle interval: at most 60 emissions per second.
pub const DEFAULT_THROTTLE_INTERVAL_MS: f64 = 1000.0 / 60.0;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-friendly output
    #[default]
    Pretty,
    /// JSON lines
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => f.write_str("pretty"),
            Self::Json => f.write_str("json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}. Expected one of: pretty, json")),
        }
    }
}

/// One entry of the fixed parameter table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// OSC address, also the key clients use on the control channel
    pub address: String,
    /// Initial value
    pub value: f64,
    /// Lower bound (inclusive)
    pub min: f64,
    /// Upper bound (inclusive)
    pub max: f64,
}

impl ParameterDef {
    #[must_use]
    pub fn new(address: impl Into<String>, value: f64, min: f64, max: f64) -> Self {
        Self {
            address: address.into(),
            value,
            min,
            max,
        }
    }

    /// Check the range invariant for this definition.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.address.is_empty() {
            return Err(ConfigError::ValidationError(
                "parameter address must not be empty".to_string(),
            ));
        }
        if !(self.min.is_finite() && self.max.is_finite() && self.value.is_finite()) {
            return Err(ConfigError::ValidationError(format!(
                "{}: value, min and max must be finite",
                self.address
            )));
        }
        if self.min > self.max {
            return Err(ConfigError::ValidationError(format!(
                "{}: min {} is greater than max {}",
                self.address, self.min, self.max
            )));
        }
        if self.value < self.min || self.value > self.max {
            return Err(ConfigError::ValidationError(format!(
                "{}: initial value {} outside [{}, {}]",
                self.address, self.value, self.min, self.max
            )));
        }
        Ok(())
    }
}

/// The user camera parameter table the bridge ships with.
#[must_use]
pub fn default_parameters() -> Vec<ParameterDef> {
    vec![
        ParameterDef::new("/usercamera/Zoom", 45.0, 20.0, 150.0),
        ParameterDef::new("/usercamera/Exposure", 0.0, -10.0, 4.0),
        ParameterDef::new("/usercamera/FocalDistance", 1.5, 0.0, 10.0),
        ParameterDef::new("/usercamera/Aperture", 15.0, 1.4, 32.0),
        ParameterDef::new("/usercamera/FlySpeed", 3.0, 0.1, 15.0),
        ParameterDef::new("/usercamera/TurnSpeed", 1.0, 0.1, 5.0),
        ParameterDef::new("/usercamera/SmoothingStrength", 5.0, 0.1, 10.0),
        ParameterDef::new("/usercamera/PhotoRate", 1.0, 0.1, 2.0),
        ParameterDef::new("/usercamera/Duration", 2.0, 0.1, 60.0),
    ]
}

/// `[server]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// `[osc]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OscSection {
    /// Destination `host:port` for outbound parameter updates
    pub target: String,
}

impl Default for OscSection {
    fn default() -> Self {
        Self {
            target: DEFAULT_OSC_TARGET.to_string(),
        }
    }
}

/// `[throttle]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleSection {
    /// Minimum time between emissions for one address, in milliseconds
    pub interval_ms: f64,
    /// Raw delta units spanning a parameter's full range
    pub sensitivity_divisor: f64,
}

impl Default for ThrottleSection {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_THROTTLE_INTERVAL_MS,
            sensitivity_divisor: DEFAULT_SENSITIVITY_DIVISOR,
        }
    }
}

impl ThrottleSection {
    /// Throttle interval as a `Duration`.
    ///
    /// Fails for values that are not representable or that round down to zero.
    pub fn interval(&self) -> std::result::Result<Duration, ConfigError> {
        let ms = self.interval_ms;
        match Duration::try_from_secs_f64(ms / 1000.0) {
            Ok(interval) if !interval.is_zero() => Ok(interval),
            _ => Err(ConfigError::ValidationError(format!(
                "throttle.interval_ms must be a positive duration of at least 1ns, got {ms}"
            ))),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub server: ServerSection,
    pub osc: OscSection,
    pub throttle: ThrottleSection,
    pub logging: LogConfig,
    /// Empty means "use the built-in table"
    pub parameters: Vec<ParameterDef>,
}

impl BridgeConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let display = path.display().to_string();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(display).into());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(display, e.to_string()))?;
        let config = Self::from_toml_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize back to TOML, with the effective parameter table filled in.
    pub fn to_toml_string(&self) -> Result<String> {
        let mut effective = self.clone();
        effective.parameters = self.effective_parameters();
        toml::to_string_pretty(&effective)
            .map_err(|e| ConfigError::SerializeFailed(e.to_string()).into())
    }

    /// The parameter table the registry should be built from.
    #[must_use]
    pub fn effective_parameters(&self) -> Vec<ParameterDef> {
        if self.parameters.is_empty() {
            default_parameters()
        } else {
            self.parameters.clone()
        }
    }

    /// Reject values the bridge cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.throttle.interval()?;
        let divisor = self.throttle.sensitivity_divisor;
        if !divisor.is_finite() || divisor <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "throttle.sensitivity_divisor must be positive, got {divisor}"
            ))
            .into());
        }
        if self.osc.target.trim().is_empty() {
            return Err(
                ConfigError::ValidationError("osc.target must not be empty".to_string()).into(),
            );
        }
        for def in &self.parameters {
            def.validate()?;
        }
        Ok(())
    }
}
