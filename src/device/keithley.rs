//! SCPI vocabulary of the Keithley 6517B.
//!
//! Only the subset the bridge drives is listed here. Setters truncate their
//! argument into the range the instrument accepts instead of rejecting it.

use std::ops::RangeInclusive;

pub const READ: &str = ":READ?";

pub const SOURCE_VOLTAGE: &str = ":SOUR:VOLT?";
pub const SOURCE_VOLTAGE_RANGE: &str = ":SOUR:VOLT:RANG?";
pub const SOURCE_VOLTAGE_AUTO_RANGE: &str = ":SOUR:VOLT:RANG:AUTO 1";

pub const CURRENT_RANGE: &str = ":SENS:CURR:RANG?";
pub const CURRENT_AUTO_RANGE: &str = ":SENS:CURR:RANG:AUTO 1";

pub const OUTPUT: &str = ":OUTP?";
pub const OUTPUT_ON: &str = ":OUTP ON";
pub const OUTPUT_OFF: &str = ":OUTP OFF";

pub const RESET: &str = "*RST;:STAT:PRES;*CLS";

pub const SOURCE_VOLTAGE_LIMITS: RangeInclusive<f64> = -1000.0..=1000.0;
pub const CURRENT_RANGE_LIMITS: RangeInclusive<f64> = -20e-3..=20e-3;
pub const NPLC_LIMITS: RangeInclusive<f64> = 0.01..=10.0;

/// Steps and pause used when ramping the source before shutdown.
pub const RAMP_STEPS: u32 = 30;
pub const RAMP_PAUSE_MS: u64 = 20;

pub fn truncate(value: f64, limits: &RangeInclusive<f64>) -> f64 {
    value.clamp(*limits.start(), *limits.end())
}

pub fn set_source_voltage(volts: f64) -> String {
    format!(
        ":SOUR:VOLT:LEV {}",
        truncate(volts, &SOURCE_VOLTAGE_LIMITS)
    )
}

pub fn set_source_voltage_range(volts: f64) -> String {
    format!(
        ":SOUR:VOLT:RANG {}",
        truncate(volts, &SOURCE_VOLTAGE_LIMITS)
    )
}

pub fn set_current_range(amps: f64) -> String {
    format!(
        ":SENS:CURR:RANG:AUTO 0;:SENS:CURR:RANG {}",
        truncate(amps, &CURRENT_RANGE_LIMITS)
    )
}

pub fn configure_current(nplc: f64) -> String {
    format!(
        ":SENS:FUNC 'CURR';:SENS:CURR:NPLC {}",
        truncate(nplc, &NPLC_LIMITS)
    )
}

/// Pulls the physical value out of a reading.
///
/// Readings look like `+1.234567E-12NADC,+0000012.345secs,+00001RDNG#`:
/// the first field carries the value followed by a unit suffix. Plain
/// numeric replies (`+1.000000E+02`) parse the same way.
pub fn extract_value(reply: &str) -> Option<f64> {
    let field = reply.split(',').next()?.trim();
    let number = field.trim_end_matches(|c: char| c.is_ascii_alphabetic() || c == '#');
    number.parse().ok()
}

/// `:OUTP?` answers `1` or `0`; some firmware echoes `ON` / `OFF`.
pub fn parse_state(reply: &str) -> Option<bool> {
    match reply.trim() {
        "1" | "ON" => Some(true),
        "0" | "OFF" => Some(false),
        _ => None,
    }
}
