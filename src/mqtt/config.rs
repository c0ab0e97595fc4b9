use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Broker connection settings, the `[mqtt]` table of the config file.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct MqttSettings {
    pub broker: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,
    /// Pause between two reconnection attempts
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl MqttSettings {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "keithley6517b".to_string()
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_connection_timeout_secs() -> u64 {
    60
}

fn default_reconnect_delay_secs() -> u64 {
    5
}
