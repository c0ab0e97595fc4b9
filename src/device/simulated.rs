//! In-process stand-in for a 6517B.
//!
//! Answers the SCPI subset the bridge uses so the whole bridge can run
//! against a broker without hardware (`--simulate`). The modelled sample is
//! a fixed resistor between the voltage source and the ammeter input.

use super::transport::{Connector, Transport};
use super::DeviceError;
use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, warn};

const SAMPLE_RESISTANCE_OHMS: f64 = 1e12;
const CURRENT_RANGES: [f64; 11] = [
    2e-12, 20e-12, 200e-12, 2e-9, 20e-9, 200e-9, 2e-6, 20e-6, 200e-6, 2e-3, 20e-3,
];

#[derive(Debug, Clone)]
struct InstrumentState {
    source_voltage: f64,
    source_range: f64,
    output: bool,
    current_range: f64,
    current_auto_range: bool,
    nplc: f64,
    readings: u32,
}

impl Default for InstrumentState {
    fn default() -> Self {
        Self {
            source_voltage: 0.0,
            source_range: 100.0,
            output: false,
            current_range: 20e-3,
            current_auto_range: true,
            nplc: 1.0,
            readings: 0,
        }
    }
}

impl InstrumentState {
    fn current(&self) -> f64 {
        if self.output {
            self.source_voltage / SAMPLE_RESISTANCE_OHMS
        } else {
            0.0
        }
    }

    fn auto_current_range(&self) -> f64 {
        let magnitude = self.current().abs();
        CURRENT_RANGES
            .iter()
            .copied()
            .find(|range| *range >= magnitude)
            .unwrap_or(CURRENT_RANGES[CURRENT_RANGES.len() - 1])
    }

    fn apply(&mut self, header: &str, argument: Option<&str>) -> Result<(), String> {
        let number = || {
            argument
                .and_then(|a| a.parse::<f64>().ok())
                .ok_or_else(|| format!("{header} expects a number"))
        };

        match header {
            "*RST" => *self = Self::default(),
            ":STAT:PRES" | "*CLS" => {}
            ":SOUR:VOLT:LEV" | ":SOUR:VOLT" => self.source_voltage = number()?,
            ":SOUR:VOLT:RANG" => self.source_range = number()?,
            ":SOUR:VOLT:RANG:AUTO" => {
                if number()? != 0.0 {
                    self.source_range = if self.source_voltage.abs() <= 100.0 {
                        100.0
                    } else {
                        1000.0
                    };
                }
            }
            ":SENS:CURR:RANG" => self.current_range = number()?,
            ":SENS:CURR:RANG:AUTO" => self.current_auto_range = number()? != 0.0,
            ":SENS:CURR:NPLC" => self.nplc = number()?,
            ":SENS:FUNC" => {}
            ":OUTP" => {
                self.output = match argument {
                    Some("ON") | Some("1") => true,
                    Some("OFF") | Some("0") => false,
                    _ => return Err(":OUTP expects ON or OFF".to_string()),
                }
            }
            _ => return Err(format!("undefined header {header}")),
        }
        Ok(())
    }

    fn answer(&mut self, header: &str, started: Instant) -> Result<String, String> {
        let reply = match header {
            ":READ?" => {
                self.readings += 1;
                format!(
                    "{:+E}NADC,{:+.3}secs,{:+05}RDNG#",
                    self.current(),
                    started.elapsed().as_secs_f64(),
                    self.readings
                )
            }
            ":SOUR:VOLT?" => format!("{:+E}", self.source_voltage),
            ":SOUR:VOLT:RANG?" => format!("{:+E}", self.source_range),
            ":SENS:CURR:RANG?" => {
                let range = if self.current_auto_range {
                    self.auto_current_range()
                } else {
                    self.current_range
                };
                format!("{:+E}", range)
            }
            ":SENS:CURR:NPLC?" => format!("{:+E}", self.nplc),
            ":OUTP?" => (if self.output { "1" } else { "0" }).to_string(),
            _ => return Err(format!("undefined query {header}")),
        };
        Ok(reply)
    }
}

/// Hands out transports that all talk to the same simulated instrument.
#[derive(Clone)]
pub struct SimulatedConnector {
    state: Arc<Mutex<InstrumentState>>,
    unplugged: Arc<AtomicBool>,
    started: Instant,
}

impl Default for SimulatedConnector {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(InstrumentState::default())),
            unplugged: Arc::new(AtomicBool::new(false)),
            started: Instant::now(),
        }
    }
}

#[cfg(test)]
impl SimulatedConnector {
    /// Makes open attempts and all I/O on open transports fail.
    pub fn unplug(&self) {
        self.unplugged.store(true, Ordering::SeqCst);
    }

    pub fn plug(&self) {
        self.unplugged.store(false, Ordering::SeqCst);
    }

    pub fn source_voltage(&self) -> f64 {
        self.state.lock().unwrap().source_voltage
    }

    /// Sets the source level without going through SCPI validation.
    pub fn force_source_voltage(&self, volts: f64) {
        self.state.lock().unwrap().source_voltage = volts;
    }

    pub fn output(&self) -> bool {
        self.state.lock().unwrap().output
    }
}

#[async_trait]
impl Connector for SimulatedConnector {
    fn resource(&self) -> &str {
        "simulated 6517B"
    }

    async fn open(&self) -> Result<Box<dyn Transport>, DeviceError> {
        if self.unplugged.load(Ordering::SeqCst) {
            return Err(DeviceError::Connect {
                resource: self.resource().to_string(),
                reason: "instrument unplugged".to_string(),
            });
        }
        Ok(Box::new(SimulatedTransport {
            connector: self.clone(),
        }))
    }
}

pub struct SimulatedTransport {
    connector: SimulatedConnector,
}

impl SimulatedTransport {
    fn check_link(&self) -> Result<(), DeviceError> {
        if self.connector.unplugged.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "instrument unplugged").into());
        }
        Ok(())
    }

    fn run(&self, line: &str) -> Result<Option<String>, DeviceError> {
        let mut state = self
            .connector
            .state
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "simulated instrument poisoned"))?;

        let mut reply = None;
        for segment in line.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let (header, argument) = match segment.split_once(char::is_whitespace) {
                Some((header, argument)) => (header, Some(argument.trim())),
                None => (segment, None),
            };
            let header = header.to_ascii_uppercase();

            let outcome = if header.ends_with('?') {
                state
                    .answer(&header, self.connector.started)
                    .map(|answer| reply = Some(answer))
            } else {
                state.apply(&header, argument)
            };
            if let Err(e) = outcome {
                // A real instrument queues an SCPI error and carries on.
                warn!("Simulated 6517B ignored `{}`: {}", segment, e);
            }
        }
        Ok(reply)
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn write_line(&mut self, command: &str) -> Result<(), DeviceError> {
        self.check_link()?;
        debug!("Simulated 6517B <- {}", command);
        self.run(command)?;
        Ok(())
    }

    async fn query(&mut self, command: &str) -> Result<String, DeviceError> {
        self.check_link()?;
        debug!("Simulated 6517B <- {}", command);
        match self.run(command)? {
            Some(reply) => Ok(reply),
            // Real hardware stays silent and the read times out.
            None => Err(DeviceError::Timeout(command.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::keithley;

    async fn open() -> (SimulatedConnector, Box<dyn Transport>) {
        let connector = SimulatedConnector::default();
        let transport = connector.open().await.unwrap();
        (connector, transport)
    }

    #[tokio::test]
    async fn current_follows_source_when_output_is_on() {
        let (_, mut link) = open().await;
        link.write_line(":SOUR:VOLT:LEV 100").await.unwrap();

        let idle = link.query(keithley::READ).await.unwrap();
        assert_eq!(keithley::extract_value(&idle), Some(0.0));

        link.write_line(keithley::OUTPUT_ON).await.unwrap();
        let reading = link.query(keithley::READ).await.unwrap();
        assert!(reading.contains("NADC"));
        let amps = keithley::extract_value(&reading).unwrap();
        assert!((amps - 1e-10).abs() < 1e-18);
    }

    #[tokio::test]
    async fn compound_commands_are_applied_in_order() {
        let (_, mut link) = open().await;
        link.write_line(&keithley::set_current_range(2e-9)).await.unwrap();

        let range = link.query(keithley::CURRENT_RANGE).await.unwrap();
        assert_eq!(keithley::extract_value(&range), Some(2e-9));

        link.write_line(keithley::CURRENT_AUTO_RANGE).await.unwrap();
        let range = link.query(keithley::CURRENT_RANGE).await.unwrap();
        assert_eq!(keithley::extract_value(&range), Some(2e-12));
    }

    #[tokio::test]
    async fn reset_restores_power_on_state() {
        let (connector, mut link) = open().await;
        link.write_line(":SOUR:VOLT:LEV 42").await.unwrap();
        link.write_line(keithley::OUTPUT_ON).await.unwrap();
        link.write_line(keithley::RESET).await.unwrap();

        assert_eq!(connector.source_voltage(), 0.0);
        assert!(!connector.output());
    }

    #[tokio::test]
    async fn unplugged_instrument_fails_io_and_open() {
        let (connector, mut link) = open().await;
        connector.unplug();

        let err = link.query(keithley::OUTPUT).await.unwrap_err();
        assert!(matches!(err, DeviceError::Io(_)));
        assert!(connector.open().await.is_err());

        connector.plug();
        assert_eq!(link.query(keithley::OUTPUT).await.unwrap(), "0");
    }

    #[tokio::test]
    async fn unknown_query_times_out() {
        let (_, mut link) = open().await;
        let err = link.query(":SYST:BOGUS?").await.unwrap_err();
        assert!(matches!(err, DeviceError::Timeout(_)));
    }
}
