//! Electrometer driver with statum link states
//!
//! ```text
//! Disconnected ──connect──► Connected
//!      ▲                        │
//!      └──────disconnect────────┘
//! ```
//!
//! Instrument operations only exist on `Electrometer<Connected>`, so an
//! operation on a closed link does not compile. Runtime switching between
//! the two states is done by [`super::adapter::DeviceAdapter`].

use super::keithley;
use super::transport::{Connector, Transport};
use super::DeviceError;
use statum::{machine, state};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[state]
#[derive(Debug, Clone)]
pub enum LinkState {
    Disconnected,
    Connected,
}

#[machine]
pub struct Electrometer<S: LinkState> {
    connector: Arc<dyn Connector>,
    transport: Option<Box<dyn Transport>>,
}

impl<S: LinkState> Electrometer<S> {
    pub fn resource(&self) -> &str {
        self.connector.resource()
    }
}

impl Electrometer<Disconnected> {
    pub fn create(connector: Arc<dyn Connector>) -> Self {
        Self::new(connector, None)
    }

    /// Opens the link; on failure hands the disconnected machine back.
    pub async fn connect(mut self) -> Result<Electrometer<Connected>, (Self, DeviceError)> {
        info!("Connecting to Keithley 6517B at {} ...", self.resource());
        match self.connector.open().await {
            Ok(transport) => {
                self.transport = Some(transport);
                info!("Keithley 6517B connected.");
                Ok(self.transition())
            }
            Err(e) => {
                warn!("Keithley 6517B connection failed: {}", e);
                Err((self, e))
            }
        }
    }
}

impl Electrometer<Connected> {
    pub fn disconnect(mut self) -> Electrometer<Disconnected> {
        info!("Closing link to Keithley 6517B at {}", self.resource());
        self.transport = None;
        self.transition()
    }

    async fn write(&mut self, command: &str) -> Result<(), DeviceError> {
        match self.transport.as_mut() {
            Some(transport) => transport.write_line(command).await,
            None => Err(DeviceError::NotConnected),
        }
    }

    async fn query(&mut self, command: &str) -> Result<String, DeviceError> {
        match self.transport.as_mut() {
            Some(transport) => transport.query(command).await,
            None => Err(DeviceError::NotConnected),
        }
    }

    async fn query_value(&mut self, command: &str) -> Result<f64, DeviceError> {
        let reply = self.query(command).await?;
        keithley::extract_value(&reply).ok_or_else(|| DeviceError::parse(command, &reply))
    }

    /// Triggers a reading and returns the measured current in amps.
    pub async fn current(&mut self) -> Result<f64, DeviceError> {
        self.query_value(keithley::READ).await
    }

    pub async fn source_voltage(&mut self) -> Result<f64, DeviceError> {
        self.query_value(keithley::SOURCE_VOLTAGE).await
    }

    pub async fn set_source_voltage(&mut self, volts: f64) -> Result<(), DeviceError> {
        self.write(&keithley::set_source_voltage(volts)).await
    }

    pub async fn source_voltage_range(&mut self) -> Result<f64, DeviceError> {
        self.query_value(keithley::SOURCE_VOLTAGE_RANGE).await
    }

    pub async fn set_source_voltage_range(&mut self, volts: f64) -> Result<(), DeviceError> {
        self.write(&keithley::set_source_voltage_range(volts)).await
    }

    pub async fn auto_range_source(&mut self) -> Result<(), DeviceError> {
        self.write(keithley::SOURCE_VOLTAGE_AUTO_RANGE).await
    }

    /// Prepares the source: a fixed range when given, auto range otherwise.
    pub async fn apply_voltage(&mut self, voltage_range: Option<f64>) -> Result<(), DeviceError> {
        match voltage_range {
            Some(range) => self.set_source_voltage_range(range).await,
            None => self.auto_range_source().await,
        }
    }

    pub async fn current_range(&mut self) -> Result<f64, DeviceError> {
        self.query_value(keithley::CURRENT_RANGE).await
    }

    pub async fn set_current_range(&mut self, amps: f64) -> Result<(), DeviceError> {
        self.write(&keithley::set_current_range(amps)).await
    }

    pub async fn source_enabled(&mut self) -> Result<bool, DeviceError> {
        let reply = self.query(keithley::OUTPUT).await?;
        keithley::parse_state(&reply).ok_or_else(|| DeviceError::parse(keithley::OUTPUT, &reply))
    }

    pub async fn set_source_enabled(&mut self, enabled: bool) -> Result<(), DeviceError> {
        if enabled {
            self.enable_source().await
        } else {
            self.disable_source().await
        }
    }

    pub async fn enable_source(&mut self) -> Result<(), DeviceError> {
        self.write(keithley::OUTPUT_ON).await
    }

    pub async fn disable_source(&mut self) -> Result<(), DeviceError> {
        self.write(keithley::OUTPUT_OFF).await
    }

    /// Switches the sense function to current.
    ///
    /// With `auto_range` the ammeter picks its own range, otherwise `current`
    /// is used as the fixed range.
    pub async fn measure_current(
        &mut self,
        nplc: f64,
        current: f64,
        auto_range: bool,
    ) -> Result<(), DeviceError> {
        debug!(
            "Configuring current measurement: nplc={}, current={}, auto_range={}",
            nplc, current, auto_range
        );
        self.write(&keithley::configure_current(nplc)).await?;
        if auto_range {
            self.write(keithley::CURRENT_AUTO_RANGE).await
        } else {
            self.set_current_range(current).await
        }
    }

    pub async fn reset(&mut self) -> Result<(), DeviceError> {
        self.write(keithley::RESET).await
    }

    /// Ramps the source down to 0 V and switches the output off.
    pub async fn shutdown(&mut self) -> Result<(), DeviceError> {
        self.ramp_to_voltage(0.0).await?;
        self.disable_source().await
    }

    async fn ramp_to_voltage(&mut self, target: f64) -> Result<(), DeviceError> {
        let start = self.source_voltage().await?;
        debug!("Ramping source from {} V to {} V", start, target);

        let steps = keithley::RAMP_STEPS;
        for step in 1..=steps {
            let volts = start + (target - start) * f64::from(step) / f64::from(steps);
            self.set_source_voltage(volts).await?;
            tokio::time::sleep(Duration::from_millis(keithley::RAMP_PAUSE_MS)).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::simulated::SimulatedConnector;

    async fn connected(connector: &SimulatedConnector) -> Electrometer<Connected> {
        let connector: Arc<dyn Connector> = Arc::new(connector.clone());
        match Electrometer::create(connector).connect().await {
            Ok(device) => device,
            Err((_, e)) => panic!("connect failed: {e}"),
        }
    }

    #[tokio::test]
    async fn failed_connect_returns_disconnected_machine() {
        let sim = SimulatedConnector::default();
        sim.unplug();

        let connector: Arc<dyn Connector> = Arc::new(sim.clone());
        let (device, err) = match Electrometer::create(connector).connect().await {
            Ok(_) => panic!("connect should fail while unplugged"),
            Err(failure) => failure,
        };
        assert!(err.is_link_failure());

        sim.plug();
        assert!(device.connect().await.is_ok());
    }

    #[tokio::test]
    async fn setters_round_trip_through_the_instrument() {
        let sim = SimulatedConnector::default();
        let mut device = connected(&sim).await;

        device.set_source_voltage(12.5).await.unwrap();
        assert_eq!(device.source_voltage().await.unwrap(), 12.5);

        device.apply_voltage(Some(1000.0)).await.unwrap();
        assert_eq!(device.source_voltage_range().await.unwrap(), 1000.0);

        device.set_source_enabled(true).await.unwrap();
        assert!(device.source_enabled().await.unwrap());
    }

    #[tokio::test]
    async fn measure_current_with_fixed_range() {
        let sim = SimulatedConnector::default();
        let mut device = connected(&sim).await;

        device.measure_current(1.0, 2e-9, false).await.unwrap();
        assert_eq!(device.current_range().await.unwrap(), 2e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_ramps_to_zero_and_disables_output() {
        let sim = SimulatedConnector::default();
        let mut device = connected(&sim).await;
        device.set_source_voltage(300.0).await.unwrap();
        device.enable_source().await.unwrap();

        device.shutdown().await.unwrap();

        assert_eq!(sim.source_voltage(), 0.0);
        assert!(!sim.output());
    }

    #[tokio::test]
    async fn disconnect_drops_the_link() {
        let sim = SimulatedConnector::default();
        let device = connected(&sim).await;
        let device = device.disconnect();
        assert_eq!(device.resource(), "simulated 6517B");
    }
}
