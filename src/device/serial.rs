//! RS-232 link to the electrometer.
//!
//! The 6517B speaks SCPI over its serial port: one command per line,
//! replies terminated by a line feed. Commands are terminated with `\n`.

use super::transport::{Connector, Transport};
use super::DeviceError;
use crate::config::DeviceSettings;
use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::debug;

pub struct SerialConnector {
    port: String,
    baud_rate: u32,
    timeout: Duration,
}

impl SerialConnector {
    pub fn new(port: impl Into<String>, baud_rate: u32, timeout: Duration) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            timeout,
        }
    }

    pub fn from_settings(settings: &DeviceSettings) -> Self {
        Self::new(settings.port.clone(), settings.baud_rate, settings.timeout())
    }
}

#[async_trait]
impl Connector for SerialConnector {
    fn resource(&self) -> &str {
        &self.port
    }

    async fn open(&self) -> Result<Box<dyn Transport>, DeviceError> {
        let stream = tokio_serial::new(&self.port, self.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| DeviceError::Connect {
                resource: self.port.clone(),
                reason: e.to_string(),
            })?;

        debug!("Serial port '{}' opened at {} baud", self.port, self.baud_rate);
        Ok(Box::new(SerialTransport {
            stream: BufReader::new(stream),
            timeout: self.timeout,
        }))
    }
}

pub struct SerialTransport {
    stream: BufReader<SerialStream>,
    timeout: Duration,
}

#[async_trait]
impl Transport for SerialTransport {
    async fn write_line(&mut self, command: &str) -> Result<(), DeviceError> {
        let port = self.stream.get_mut();
        port.write_all(command.as_bytes()).await?;
        port.write_all(b"\n").await?;
        port.flush().await?;
        debug!("Sent serial command: {}", command);
        Ok(())
    }

    async fn query(&mut self, command: &str) -> Result<String, DeviceError> {
        self.write_line(command).await?;

        let mut reply = String::new();
        let read = tokio::time::timeout(self.timeout, self.stream.read_line(&mut reply))
            .await
            .map_err(|_| DeviceError::Timeout(command.to_string()))??;
        if read == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "serial port closed").into());
        }

        let reply = reply.trim_end().to_string();
        debug!("Serial reply to {}: {}", command, reply);
        Ok(reply)
    }
}
