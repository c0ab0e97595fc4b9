//! # Bridge Configuration
//!
//! Loads the TOML file that tells the bridge which broker to talk to, which
//! topic namespace it owns and where the electrometer is attached.
//!
//! Missing optional keys fall back to defaults so a minimal file only needs
//! the broker host and the two naming keys:
//!
//! ```toml
//! [mqtt]
//! broker = "localhost"
//!
//! [device]
//! topic_base = "lab"
//! device_name = "keithley"
//! ```

use crate::mqtt::config::MqttSettings;
use color_eyre::eyre::{eyre, Result, WrapErr};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const CONFIG_DIR: &str = "keithley-bridge";
const CONFIG_FILE: &str = "config.toml";

/// Complete configuration of one bridge process.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct BridgeConfig {
    pub mqtt: MqttSettings,
    pub device: DeviceSettings,
    #[serde(default)]
    pub measurement: MeasurementSettings,
}

/// Topic naming and the serial resource of the instrument.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct DeviceSettings {
    /// Prefix of every topic owned by this bridge
    pub topic_base: String,
    /// Device segment of every topic owned by this bridge
    pub device_name: String,
    /// Serial port the electrometer is attached to
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Read timeout for a single instrument reply
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl DeviceSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Periodic current measurement settings.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct MeasurementSettings {
    /// Seconds between two readings while continuous measurement is on
    #[serde(default = "default_current_interval_secs")]
    pub current_interval_secs: f64,
}

impl Default for MeasurementSettings {
    fn default() -> Self {
        Self {
            current_interval_secs: default_current_interval_secs(),
        }
    }
}

impl MeasurementSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.current_interval_secs)
    }
}

fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_timeout_ms() -> u64 {
    2000
}

fn default_current_interval_secs() -> f64 {
    1.0
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl BridgeConfig {
    /// Reads and validates the configuration file at `path`.
    pub async fn load(path: &Path) -> Result<Self> {
        debug!("Loading configuration from {}", path.display());
        let content = tokio::fs::read_to_string(path)
            .await
            .wrap_err_with(|| format!("Failed to read config file {}", path.display()))?;

        let config = Self::parse(&content)
            .wrap_err_with(|| format!("Failed to load config file {}", path.display()))?;

        info!(
            "Configuration loaded: broker {}:{}, topics {}/…/{}",
            config.mqtt.broker, config.mqtt.port, config.device.topic_base, config.device.device_name
        );
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| eyre!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// `<user config dir>/keithley-bridge/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        let mut path = dirs::config_dir().ok_or_else(|| eyre!("No config directory available"))?;
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        Ok(path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_topic_level("device.topic_base", &self.device.topic_base, true)?;
        check_topic_level("device.device_name", &self.device.device_name, false)?;

        if self.mqtt.client_id.is_empty() {
            return Err(ConfigError::Invalid {
                field: "mqtt.client_id",
                reason: "must not be empty".to_string(),
            });
        }
        let interval = self.measurement.current_interval_secs;
        if !interval.is_finite() || interval <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "measurement.current_interval_secs",
                reason: format!("{} is not a positive duration", interval),
            });
        }
        Ok(())
    }
}

// Wildcards would turn published topics into filters. The base may span
// several levels, the device name is exactly one.
fn check_topic_level(
    field: &'static str,
    value: &str,
    multi_level: bool,
) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    };

    if value.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if value.contains(['+', '#']) {
        return Err(invalid("must not contain MQTT wildcards"));
    }
    if !multi_level && value.contains('/') {
        return Err(invalid("must be a single topic level"));
    }
    if value.split('/').any(str::is_empty) {
        return Err(invalid("must not contain empty topic levels"));
    }
    Ok(())
}
