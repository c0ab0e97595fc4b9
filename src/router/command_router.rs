//! Command Router - topic commands to instrument operations
//!
//! Runs one command at a time against the [`DeviceAdapter`] and publishes
//! the outcome:
//!
//! - `response/<device>/<command>` with `{"value", "sender_payload"}` on success
//! - `error/disconnected/<device>` when the instrument link failed
//! - `error/command/<device>` when the parameters were rejected
//! - retained `connected/<device>` whenever the link status changed
//!
//! Every successful command is followed by the current
//! `measure_continously` flag so clients can keep their view in sync.

use super::command::{Command, CommandError, CommandPayload};
use crate::device::{DeviceAdapter, DeviceError, LinkStatus};
use crate::mqtt::message_manager::{OutboundMessage, Publisher};
use crate::mqtt::topics::Topics;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

/// Response name used by `auto_range_source`.
const VOLTAGE_RANGE: &str = "voltage_range";

pub struct CommandRouter<P: Publisher> {
    device: DeviceAdapter,
    publisher: P,
    topics: Topics,
    measure_continuously: bool,
    // Last status published on the retained `connected` topic
    announced: Option<LinkStatus>,
}

impl<P: Publisher> CommandRouter<P> {
    pub fn new(device: DeviceAdapter, publisher: P, topics: Topics) -> Self {
        Self {
            device,
            publisher,
            topics,
            measure_continuously: false,
            announced: None,
        }
    }

    pub fn measuring(&self) -> bool {
        self.measure_continuously
    }

    /// Runs one command and publishes its outcome.
    pub async fn handle(&mut self, command: Command, payload: CommandPayload) {
        debug!(
            "Handling command {} with payload {}",
            command,
            payload.as_value()
        );

        match self.execute(command, &payload).await {
            Ok(()) => {}
            Err(CommandError::Device(e)) if e.is_link_failure() => {
                warn!("Error in command {}: {}", command, e);
                self.publish_connection_error(command, &e).await;
            }
            Err(e) => {
                warn!("Command {} rejected: {}", command, e);
                self.publish_command_error(command, &e.to_string()).await;
            }
        }

        self.sync_status().await;
    }

    /// Takes a reading when continuous measurement is on.
    pub async fn measure_tick(&mut self) {
        if !self.measure_continuously {
            return;
        }
        debug!("Time to measure current");
        self.handle(Command::Current, CommandPayload::regular()).await;
    }

    /// Called after every (re)connection to the broker.
    ///
    /// Tries to reach the instrument and republishes the retained status,
    /// which the broker may have replaced with the last will meanwhile.
    pub async fn announce(&mut self) {
        if let Err(e) = self.device.ensure_connected().await {
            warn!("Keithley not reachable: {}", e);
        }
        let status = self.device.status();
        self.publish_status(status).await;
    }

    pub fn stop(&mut self) {
        debug!("User stop");
        self.measure_continuously = false;
    }

    async fn execute(
        &mut self,
        command: Command,
        payload: &CommandPayload,
    ) -> Result<(), CommandError> {
        match command {
            Command::ApplyVoltage => {
                let voltage_range = payload.number("value").map_err(|_| {
                    CommandError::InvalidParameter(format!(
                        "Invalid voltage range: {}",
                        payload.get("value").unwrap_or(&Value::Null)
                    ))
                })?;
                self.device.apply_voltage(voltage_range).await?;
                self.respond(command.as_str(), json!(voltage_range), payload)
                    .await;
            }
            Command::AutoRangeSource => {
                self.device.auto_range_source().await?;
                let range = self.device.source_voltage_range().await?;
                self.respond(VOLTAGE_RANGE, json!(range), payload).await;
            }
            Command::Current => {
                let current = self.device.current().await?;
                self.respond(command.as_str(), json!(current), payload)
                    .await;
            }
            Command::CurrentRange => {
                if let Some(range) = payload.number("value")? {
                    self.device.set_current_range(range).await?;
                }
                let range = self.device.current_range().await?;
                self.respond(command.as_str(), json!(range), payload).await;
            }
            Command::DisableSource => {
                self.device.disable_source().await?;
                self.respond_source_enabled(payload).await?;
            }
            Command::EnableSource => {
                self.device.enable_source().await?;
                self.respond_source_enabled(payload).await?;
            }
            Command::MeasureContinuously => {
                if let Some(enabled) = payload.flag("value")? {
                    debug!("Setting measure_continously to {}", enabled);
                    self.measure_continuously = enabled;
                }
            }
            Command::MeasureCurrent => {
                if payload.has_all(&["nplc", "current", "auto_range"]) {
                    let nplc = payload.number("nplc")?.unwrap_or_default();
                    let current = payload.number("current")?.unwrap_or_default();
                    let auto_range = payload.flag("auto_range")?.unwrap_or_default();
                    self.device
                        .measure_current(nplc, current, auto_range)
                        .await?;
                }
                let range = self.device.current_range().await?;
                self.respond(Command::CurrentRange.as_str(), json!(range), payload)
                    .await;
            }
            Command::Reset => {
                self.measure_continuously = false;
                self.device.reset().await?;
                self.respond(command.as_str(), json!("done"), payload).await;
            }
            Command::Shutdown => {
                self.measure_continuously = false;
                self.device.shutdown().await?;
                self.respond_source_enabled(payload).await?;
            }
            Command::SourceEnabled => {
                if let Some(enabled) = payload.flag("value")? {
                    self.device.set_source_enabled(enabled).await?;
                }
                self.respond_source_enabled(payload).await?;
            }
            Command::SourceVoltage => {
                if let Some(volts) = payload.number("value")? {
                    self.device.set_source_voltage(volts).await?;
                }
                let volts = self.device.source_voltage().await?;
                self.respond(command.as_str(), json!(volts), payload).await;
            }
            Command::SourceVoltageRange => {
                if let Some(volts) = payload.number("value")? {
                    self.device.set_source_voltage_range(volts).await?;
                }
                let volts = self.device.source_voltage_range().await?;
                self.respond(command.as_str(), json!(volts), payload).await;
            }
        }

        self.respond(
            Command::MeasureContinuously.as_str(),
            json!(self.measure_continuously),
            payload,
        )
        .await;
        Ok(())
    }

    async fn respond_source_enabled(
        &mut self,
        payload: &CommandPayload,
    ) -> Result<(), CommandError> {
        let enabled = self.device.source_enabled().await?;
        self.respond(Command::SourceEnabled.as_str(), json!(enabled), payload)
            .await;
        Ok(())
    }

    async fn respond(&mut self, command: &str, value: Value, payload: &CommandPayload) {
        let body = json!({ "value": value, "sender_payload": payload.as_value() });
        self.publish(OutboundMessage::new(
            self.topics.response(command),
            body.to_string(),
        ))
        .await;
    }

    async fn publish_connection_error(&mut self, command: Command, error: &DeviceError) {
        let body = json!({ "error": error.to_string(), "command": command.as_str() });
        self.publish(OutboundMessage::new(
            self.topics.disconnected_error(),
            body.to_string(),
        ))
        .await;
    }

    async fn publish_command_error(&mut self, command: Command, message: &str) {
        let body = json!({ "command": command.as_str(), "error_message": message });
        self.publish(OutboundMessage::new(
            self.topics.command_error(),
            body.to_string(),
        ))
        .await;
    }

    async fn sync_status(&mut self) {
        let status = self.device.status();
        if self.announced != Some(status) {
            self.publish_status(status).await;
        }
    }

    async fn publish_status(&mut self, status: LinkStatus) {
        info!(
            "Keithley {} link is {:?}",
            self.topics.device(),
            status
        );
        self.publish(OutboundMessage::retained(
            self.topics.connected(),
            status.payload().to_string(),
        ))
        .await;
        self.announced = Some(status);
    }

    async fn publish(&mut self, message: OutboundMessage) {
        debug!("Publish {}", message);
        let topic = message.topic.clone();
        if let Err(e) = self.publisher.publish_message(message).await {
            warn!("Failed to publish on {}: {}", topic, e);
        }
    }
}
