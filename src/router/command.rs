//! Command names and payload parsing.

use crate::device::DeviceError;
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Every command the bridge understands, by wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    ApplyVoltage,
    AutoRangeSource,
    Current,
    CurrentRange,
    DisableSource,
    EnableSource,
    MeasureContinuously,
    MeasureCurrent,
    Reset,
    Shutdown,
    SourceEnabled,
    SourceVoltage,
    SourceVoltageRange,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::ApplyVoltage => "apply_voltage",
            Command::AutoRangeSource => "auto_range_source",
            Command::Current => "current",
            Command::CurrentRange => "current_range",
            Command::DisableSource => "disable_source",
            Command::EnableSource => "enable_source",
            // Spelled the way deployed clients subscribe to it.
            Command::MeasureContinuously => "measure_continously",
            Command::MeasureCurrent => "measure_current",
            Command::Reset => "reset",
            Command::Shutdown => "shutdown",
            Command::SourceEnabled => "source_enabled",
            Command::SourceVoltage => "source_voltage",
            Command::SourceVoltageRange => "source_voltage_range",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown command {0}")]
pub struct UnknownCommand(pub String);

impl FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let command = match s {
            "apply_voltage" => Command::ApplyVoltage,
            "auto_range_source" => Command::AutoRangeSource,
            "current" => Command::Current,
            "current_range" => Command::CurrentRange,
            "disable_source" => Command::DisableSource,
            "enable_source" => Command::EnableSource,
            "measure_continously" | "measure_continuously" => Command::MeasureContinuously,
            "measure_current" => Command::MeasureCurrent,
            "reset" => Command::Reset,
            "shutdown" => Command::Shutdown,
            "source_enabled" => Command::SourceEnabled,
            "source_voltage" => Command::SourceVoltage,
            "source_voltage_range" => Command::SourceVoltageRange,
            other => return Err(UnknownCommand(other.to_string())),
        };
        Ok(command)
    }
}

/// Why a command produced no regular response.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Rejected before any instrument I/O happened
    #[error("{0}")]
    InvalidParameter(String),
}

/// Decoded JSON body of a command message.
///
/// The body is echoed back as `sender_payload` in every response.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandPayload(Value);

impl Default for CommandPayload {
    fn default() -> Self {
        Self(Value::Object(Map::new()))
    }
}

impl CommandPayload {
    /// Undecodable bodies count as an empty object.
    pub fn decode(bytes: &[u8]) -> Self {
        match serde_json::from_slice(bytes) {
            Ok(value) => Self(value),
            Err(e) => {
                tracing::debug!("Error decoding message payload: {}", e);
                Self::default()
            }
        }
    }

    /// Payload attached to the readings of continuous measurement.
    pub fn regular() -> Self {
        Self(json!({ "regular": true }))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Field of an object payload; `null` counts as absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0
            .as_object()
            .and_then(|body| body.get(key))
            .filter(|value| !value.is_null())
    }

    pub fn has_all(&self, keys: &[&str]) -> bool {
        keys.iter().all(|key| self.get(key).is_some())
    }

    /// Finite numeric field; numbers and numeric strings are accepted.
    pub fn number(&self, key: &str) -> Result<Option<f64>, CommandError> {
        self.get(key)
            .map(|value| {
                as_number(value).ok_or_else(|| {
                    CommandError::InvalidParameter(format!("Invalid value for {key}: {value}"))
                })
            })
            .transpose()
    }

    /// Boolean field; also accepts 0/1 and the usual on/off spellings.
    pub fn flag(&self, key: &str) -> Result<Option<bool>, CommandError> {
        self.get(key)
            .map(|value| {
                as_flag(value).ok_or_else(|| {
                    CommandError::InvalidParameter(format!("Invalid value for {key}: {value}"))
                })
            })
            .transpose()
    }
}

fn as_number(value: &Value) -> Option<f64> {
    let number: Option<f64> = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    number.filter(|n| n.is_finite())
}

fn as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|n| n != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "on" => Some(true),
            "false" | "0" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wire_names() {
        assert_eq!("current".parse::<Command>(), Ok(Command::Current));
        assert_eq!(
            "source_voltage_range".parse::<Command>(),
            Ok(Command::SourceVoltageRange)
        );
        assert_eq!(
            "measure_continuously".parse::<Command>(),
            Ok(Command::MeasureContinuously)
        );
        assert_eq!(
            "voltage".parse::<Command>(),
            Err(UnknownCommand("voltage".to_string()))
        );
    }

    #[test]
    fn wire_names_round_trip() {
        for name in ["apply_voltage", "measure_continously", "shutdown"] {
            let command: Command = name.parse().unwrap();
            assert_eq!(command.as_str(), name);
        }
    }

    #[test]
    fn invalid_json_becomes_empty_object() {
        let payload = CommandPayload::decode(b"not json");
        assert_eq!(payload.as_value(), &json!({}));
        assert_eq!(payload.number("value").unwrap(), None);
    }

    #[test]
    fn non_object_payloads_have_no_fields() {
        let payload = CommandPayload::decode(b"42");
        assert_eq!(payload.as_value(), &json!(42));
        assert!(payload.get("value").is_none());
    }

    #[test]
    fn numbers_accept_numeric_strings() {
        let payload = CommandPayload::decode(br#"{"a": 1.5, "b": " -3 ", "c": "high"}"#);
        assert_eq!(payload.number("a").unwrap(), Some(1.5));
        assert_eq!(payload.number("b").unwrap(), Some(-3.0));
        assert!(matches!(
            payload.number("c"),
            Err(CommandError::InvalidParameter(_))
        ));
    }

    #[test]
    fn non_finite_strings_are_not_numbers() {
        let payload = CommandPayload::decode(br#"{"a": "NaN", "b": "inf", "c": "-infinity"}"#);
        for key in ["a", "b", "c"] {
            assert!(matches!(
                payload.number(key),
                Err(CommandError::InvalidParameter(_))
            ));
        }
    }

    #[test]
    fn null_fields_count_as_absent() {
        let payload = CommandPayload::decode(br#"{"value": null, "nplc": 1}"#);
        assert_eq!(payload.number("value").unwrap(), None);
        assert!(payload.has_all(&["nplc"]));
        assert!(!payload.has_all(&["nplc", "value"]));
    }

    #[test]
    fn flags_accept_common_spellings() {
        let payload = CommandPayload::decode(br#"{"a": true, "b": 0, "c": "ON", "d": [1]}"#);
        assert_eq!(payload.flag("a").unwrap(), Some(true));
        assert_eq!(payload.flag("b").unwrap(), Some(false));
        assert_eq!(payload.flag("c").unwrap(), Some(true));
        assert!(payload.flag("d").is_err());
        assert_eq!(payload.flag("missing").unwrap(), None);
    }
}
