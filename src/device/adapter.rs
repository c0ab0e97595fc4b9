//! Device Adapter - runtime owner of the electrometer link
//!
//! Every operation first makes sure the link is up, connecting lazily when
//! it is not. A link failure during the operation closes the link again, so
//! the next command starts with a fresh connection attempt.

use super::electrometer::{Connected, Disconnected, Electrometer};
use super::transport::Connector;
use super::DeviceError;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Down,
    Up,
}

impl LinkStatus {
    /// Retained payload of the `connected` topic.
    pub fn payload(self) -> &'static str {
        match self {
            LinkStatus::Down => "0",
            LinkStatus::Up => "1",
        }
    }
}

enum Link {
    Down(Electrometer<Disconnected>),
    Up(Electrometer<Connected>),
}

pub struct DeviceAdapter {
    connector: Arc<dyn Connector>,
    // Only empty while a connection attempt is in flight.
    link: Option<Link>,
}

// Runs `$op` on the connected electrometer and settles the link afterwards.
macro_rules! on_device {
    ($self:ident, $device:ident => $op:expr) => {{
        let result = match $self.connected().await {
            Ok($device) => $op.await,
            Err(e) => Err(e),
        };
        $self.settle(result)
    }};
}

impl DeviceAdapter {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        let link = Link::Down(Electrometer::create(connector.clone()));
        Self {
            connector,
            link: Some(link),
        }
    }

    pub fn status(&self) -> LinkStatus {
        match self.link {
            Some(Link::Up(_)) => LinkStatus::Up,
            _ => LinkStatus::Down,
        }
    }

    async fn connected(&mut self) -> Result<&mut Electrometer<Connected>, DeviceError> {
        let link = self
            .link
            .take()
            .unwrap_or_else(|| Link::Down(Electrometer::create(self.connector.clone())));

        let device = match link {
            Link::Up(device) => device,
            Link::Down(device) => match device.connect().await {
                Ok(device) => device,
                Err((device, e)) => {
                    self.link = Some(Link::Down(device));
                    return Err(e);
                }
            },
        };

        match self.link.insert(Link::Up(device)) {
            Link::Up(device) => Ok(device),
            Link::Down(_) => Err(DeviceError::NotConnected),
        }
    }

    fn settle<T>(&mut self, result: Result<T, DeviceError>) -> Result<T, DeviceError> {
        if let Err(e) = &result {
            if e.is_link_failure() {
                self.close_link(e);
            }
        }
        result
    }

    fn close_link(&mut self, cause: &DeviceError) {
        self.link = match self.link.take() {
            Some(Link::Up(device)) => {
                warn!("Keithley link lost: {}", cause);
                Some(Link::Down(device.disconnect()))
            }
            other => other,
        };
    }

    /// Connects if needed without touching the instrument state.
    pub async fn ensure_connected(&mut self) -> Result<(), DeviceError> {
        let result = self.connected().await.map(|_| ());
        self.settle(result)
    }

    pub async fn current(&mut self) -> Result<f64, DeviceError> {
        debug!("Getting current");
        on_device!(self, device => device.current())
    }

    pub async fn apply_voltage(&mut self, voltage_range: Option<f64>) -> Result<(), DeviceError> {
        debug!("Applying voltage with range {:?}", voltage_range);
        on_device!(self, device => device.apply_voltage(voltage_range))
    }

    pub async fn auto_range_source(&mut self) -> Result<(), DeviceError> {
        on_device!(self, device => device.auto_range_source())
    }

    pub async fn source_voltage(&mut self) -> Result<f64, DeviceError> {
        on_device!(self, device => device.source_voltage())
    }

    pub async fn set_source_voltage(&mut self, volts: f64) -> Result<(), DeviceError> {
        debug!("Setting source_voltage to {}", volts);
        on_device!(self, device => device.set_source_voltage(volts))
    }

    pub async fn source_voltage_range(&mut self) -> Result<f64, DeviceError> {
        on_device!(self, device => device.source_voltage_range())
    }

    pub async fn set_source_voltage_range(&mut self, volts: f64) -> Result<(), DeviceError> {
        debug!("Setting source_voltage_range to {}", volts);
        on_device!(self, device => device.set_source_voltage_range(volts))
    }

    pub async fn current_range(&mut self) -> Result<f64, DeviceError> {
        on_device!(self, device => device.current_range())
    }

    pub async fn set_current_range(&mut self, amps: f64) -> Result<(), DeviceError> {
        debug!("Setting current range to {}", amps);
        on_device!(self, device => device.set_current_range(amps))
    }

    pub async fn source_enabled(&mut self) -> Result<bool, DeviceError> {
        on_device!(self, device => device.source_enabled())
    }

    pub async fn set_source_enabled(&mut self, enabled: bool) -> Result<(), DeviceError> {
        debug!("Setting source_enabled to {}", enabled);
        on_device!(self, device => device.set_source_enabled(enabled))
    }

    pub async fn enable_source(&mut self) -> Result<(), DeviceError> {
        on_device!(self, device => device.enable_source())
    }

    pub async fn disable_source(&mut self) -> Result<(), DeviceError> {
        on_device!(self, device => device.disable_source())
    }

    pub async fn measure_current(
        &mut self,
        nplc: f64,
        current: f64,
        auto_range: bool,
    ) -> Result<(), DeviceError> {
        on_device!(self, device => device.measure_current(nplc, current, auto_range))
    }

    pub async fn reset(&mut self) -> Result<(), DeviceError> {
        debug!("Resetting the device");
        on_device!(self, device => device.reset())
    }

    pub async fn shutdown(&mut self) -> Result<(), DeviceError> {
        debug!("Shutting down the device");
        on_device!(self, device => device.shutdown())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::simulated::SimulatedConnector;

    fn adapter() -> (SimulatedConnector, DeviceAdapter) {
        let sim = SimulatedConnector::default();
        let adapter = DeviceAdapter::new(Arc::new(sim.clone()));
        (sim, adapter)
    }

    #[tokio::test]
    async fn connects_lazily_on_first_operation() {
        let (_, mut device) = adapter();
        assert_eq!(device.status(), LinkStatus::Down);

        assert!(!device.source_enabled().await.unwrap());
        assert_eq!(device.status(), LinkStatus::Up);
    }

    #[tokio::test]
    async fn link_failure_closes_the_link() {
        let (sim, mut device) = adapter();
        device.ensure_connected().await.unwrap();

        sim.unplug();
        let err = device.current().await.unwrap_err();
        assert!(err.is_link_failure());
        assert_eq!(device.status(), LinkStatus::Down);

        // Still unplugged: the reconnection attempt fails as well.
        assert!(device.current().await.is_err());
        assert_eq!(device.status(), LinkStatus::Down);

        sim.plug();
        device.set_source_voltage(5.0).await.unwrap();
        assert_eq!(device.status(), LinkStatus::Up);
        assert_eq!(device.source_voltage().await.unwrap(), 5.0);
    }

    #[test]
    fn status_payloads() {
        assert_eq!(LinkStatus::Up.payload(), "1");
        assert_eq!(LinkStatus::Down.payload(), "0");
    }
}
