use super::DeviceError;
use async_trait::async_trait;

/// Line-oriented link to an open instrument.
#[async_trait]
pub trait Transport: Send {
    /// Sends one command line without waiting for a reply.
    async fn write_line(&mut self, command: &str) -> Result<(), DeviceError>;

    /// Sends one command line and returns the reply line without terminator.
    async fn query(&mut self, command: &str) -> Result<String, DeviceError>;
}

/// Opens fresh transports; invoked on every (re)connection attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Human readable resource name, used in logs and errors.
    fn resource(&self) -> &str;

    async fn open(&self) -> Result<Box<dyn Transport>, DeviceError>;
}
