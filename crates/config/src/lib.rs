//! Configuration model for the Pitwall telemetry companion.
//!
//! The configuration is a single JSON file with sections for the InSim TCP
//! link, the OutSim UDP listener, the beep subsystem, the WebSocket feed and
//! the per-mode (single player / multiplayer) feature switches. A parsed
//! [`Config`] is immutable; the hot-reload watcher in [`watcher`] builds a
//! fresh value and swaps it in atomically.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

pub mod watcher;

pub use watcher::ConfigWatcher;

/// Errors raised while loading or validating the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// InSim TCP connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InSimSettings {
    pub host: String,
    pub port: u16,
    pub admin_password: String,
    pub interval_ms: u16,
}

impl Default for InSimSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 29999,
            admin_password: String::new(),
            interval_ms: 100,
        }
    }
}

/// OutSim UDP listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutSimSettings {
    pub port: u16,
    /// IP addresses or CIDR ranges allowed to supply telemetry. `None`
    /// accepts any source.
    pub allowed_sources: Option<Vec<String>>,
    pub max_packets_per_second: Option<f64>,
    /// When set, the socket read timeout is `1 / update_hz` seconds so the
    /// frame loop can service other subsystems while telemetry is idle.
    pub update_hz: Option<f64>,
}

impl Default for OutSimSettings {
    fn default() -> Self {
        Self {
            port: 30000,
            allowed_sources: None,
            max_packets_per_second: None,
            update_hz: None,
        }
    }
}

/// Beep subsystem behaviour profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BeepMode {
    #[default]
    Standard,
    Calm,
    Aggressive,
}

/// Beep subsystem settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeepSettings {
    pub mode: BeepMode,
    /// Playback volume in `[0.0, 1.0]`.
    pub volume: f64,
    pub base_frequency_hz: f64,
    /// Minimum gaps between consecutive beeps, closest contact first.
    pub intervals_ms: Vec<u32>,
}

impl Default for BeepSettings {
    fn default() -> Self {
        Self {
            mode: BeepMode::Standard,
            volume: 0.5,
            base_frequency_hz: 880.0,
            intervals_ms: vec![250, 500, 1000],
        }
    }
}

/// WebSocket telemetry feed settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryWsSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub update_hz: f64,
}

impl Default for TelemetryWsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8766,
            update_hz: 15.0,
        }
    }
}

/// Per-mode feature switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeSettings {
    pub radar_enabled: bool,
    pub beeps_enabled: bool,
}

impl Default for ModeSettings {
    fn default() -> Self {
        Self {
            radar_enabled: true,
            beeps_enabled: true,
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub insim: InSimSettings,
    pub outsim: OutSimSettings,
    pub beep: BeepSettings,
    pub telemetry_ws: TelemetryWsSettings,
    pub sp: ModeSettings,
    pub mp: ModeSettings,
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.beep.volume) {
            return Err(ConfigError::Invalid(format!(
                "beep.volume must be in [0, 1], got {}",
                self.beep.volume
            )));
        }
        if self.beep.base_frequency_hz <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "beep.base_frequency_hz must be positive, got {}",
                self.beep.base_frequency_hz
            )));
        }
        if self.beep.intervals_ms.is_empty() {
            return Err(ConfigError::Invalid(
                "beep.intervals_ms must not be empty".to_string(),
            ));
        }
        if self.beep.intervals_ms.iter().any(|&ms| ms == 0) {
            return Err(ConfigError::Invalid(
                "beep.intervals_ms entries must be positive".to_string(),
            ));
        }
        if self.telemetry_ws.update_hz <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "telemetry_ws.update_hz must be positive, got {}",
                self.telemetry_ws.update_hz
            )));
        }
        if let Some(rate) = self.outsim.max_packets_per_second
            && rate <= 0.0
        {
            return Err(ConfigError::Invalid(format!(
                "outsim.max_packets_per_second must be positive, got {rate}"
            )));
        }
        if let Some(hz) = self.outsim.update_hz
            && hz <= 0.0
        {
            return Err(ConfigError::Invalid(format!(
                "outsim.update_hz must be positive, got {hz}"
            )));
        }
        if let Some(sources) = &self.outsim.allowed_sources
            && sources.iter().all(|entry| entry.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "outsim.allowed_sources contains no usable entries".to_string(),
            ));
        }
        Ok(())
    }

    /// Settings for the given multiplayer flag.
    pub fn mode_settings(&self, multiplayer: bool) -> ModeSettings {
        if multiplayer { self.mp } else { self.sp }
    }
}
