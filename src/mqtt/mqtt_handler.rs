//! Broker connection loop.
//!
//! Owns the rumqttc event loop: subscribes to the command wildcard after
//! every ConnAck, turns incoming publishes into [`Inbound`] work items and
//! keeps polling through connection errors, which makes rumqttc reconnect.

use std::time::Duration;

use chrono::{DateTime, Local};
use rumqttc::{
    AsyncClient, ConnAck, ConnectReturnCode, Event, EventLoop, LastWill, MqttOptions, Outgoing,
    Packet, Publish, QoS,
};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::MqttSettings;
use super::topics::Topics;
use super::BridgeError;
use crate::device::LinkStatus;
use crate::router::{Command, CommandPayload, Inbound};

const REQUEST_CHANNEL_CAPACITY: usize = 64;
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Clone, Debug, Default)]
pub struct MQTTStatus {
    pub connection_state: ConnectionState,
    pub messages_received: usize,
    pub commands_forwarded: usize,
    pub reconnects: usize,
    pub last_activity: Option<DateTime<Local>>,
}

pub struct MqttHandler {
    status: MQTTStatus,
    client: AsyncClient,
    eventloop: EventLoop,
    topics: Topics,
    reconnect_delay: Duration,
    worker: mpsc::Sender<Inbound>,
}

/// Connection options for one bridge.
///
/// The session is persistent so commands queued at QoS 1 survive a short
/// outage, and the broker marks the instrument as gone if the bridge dies.
pub fn build_options(settings: &MqttSettings, topics: &Topics) -> MqttOptions {
    let mut options = MqttOptions::new(
        settings.client_id.clone(),
        settings.broker.clone(),
        settings.port,
    );
    options
        .set_keep_alive(settings.keep_alive())
        .set_clean_session(false)
        .set_last_will(LastWill::new(
            topics.connected(),
            LinkStatus::Down.payload(),
            QoS::AtLeastOnce,
            true,
        ));

    if let Some(username) = &settings.username {
        options.set_credentials(
            username.clone(),
            settings.password.clone().unwrap_or_default(),
        );
    }
    options
}

impl MqttHandler {
    pub fn new(settings: &MqttSettings, topics: Topics, worker: mpsc::Sender<Inbound>) -> Self {
        let options = build_options(settings, &topics);
        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        eventloop
            .network_options
            .set_connection_timeout(settings.connection_timeout_secs);

        info!(
            "Connecting client_id {} to broker {}:{} ...",
            settings.client_id, settings.broker, settings.port
        );

        MqttHandler {
            status: MQTTStatus {
                connection_state: ConnectionState::Connecting,
                ..MQTTStatus::default()
            },
            client,
            eventloop,
            topics,
            reconnect_delay: settings.reconnect_delay(),
            worker,
        }
    }

    /// Handle used by the command worker to publish.
    pub fn client(&self) -> AsyncClient {
        self.client.clone()
    }

    /// Polls the broker connection until `shutdown` is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), BridgeError> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = self.eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => self.on_connect(ack).await?,
                    Ok(Event::Incoming(Packet::Publish(publish))) => self.on_message(publish)?,
                    Ok(Event::Incoming(Packet::SubAck(_))) => {
                        debug!("Subscribed to {}", self.topics.command_filter());
                    }
                    Ok(_) => {}
                    Err(e) => self.on_connection_error(e, &shutdown).await,
                },
            }
        }

        self.disconnect().await;
        let status = &self.status;
        info!(
            "Main loop stopped: {} messages received, {} commands forwarded, {} reconnects, last activity {:?}",
            status.messages_received, status.commands_forwarded, status.reconnects, status.last_activity
        );
        Ok(())
    }

    async fn on_connect(&mut self, ack: ConnAck) -> Result<(), BridgeError> {
        debug!("on_connect with reason code {:?}", ack.code);
        if ack.code != ConnectReturnCode::Success {
            // rumqttc reports refused connections as errors on the next poll
            warn!("Broker refused connection: {:?}", ack.code);
            return Ok(());
        }

        info!(
            "Connected to broker (session present: {})",
            ack.session_present
        );
        self.status.connection_state = ConnectionState::Connected;
        self.touch();

        self.client
            .try_subscribe(self.topics.command_filter(), QoS::AtLeastOnce)?;
        self.forward(Inbound::BrokerConnected)
    }

    fn on_message(&mut self, publish: Publish) -> Result<(), BridgeError> {
        self.status.messages_received += 1;
        self.touch();

        let Some(name) = self.topics.parse_command(&publish.topic) else {
            warn!("Unknown topic {}", publish.topic);
            return Ok(());
        };
        let command: Command = match name.parse() {
            Ok(command) => command,
            Err(e) => {
                warn!("{} on topic {}", e, publish.topic);
                return Ok(());
            }
        };

        let payload = CommandPayload::decode(&publish.payload);
        debug!(
            "Received message on topic {} with payload {}",
            publish.topic,
            payload.as_value()
        );
        self.forward(Inbound::Command { command, payload })
    }

    // A full queue means the instrument is still busy with earlier
    // commands; dropping keeps the event loop (and keep-alive) running.
    fn forward(&mut self, message: Inbound) -> Result<(), BridgeError> {
        match self.worker.try_send(message) {
            Ok(()) => {
                self.status.commands_forwarded += 1;
                Ok(())
            }
            Err(TrySendError::Full(message)) => {
                warn!("Command worker busy, dropping {:?}", message);
                Ok(())
            }
            Err(TrySendError::Closed(_)) => {
                error!("Command worker is gone");
                Err(BridgeError::ChannelError(
                    "command worker channel closed".to_string(),
                ))
            }
        }
    }

    async fn on_connection_error(
        &mut self,
        e: rumqttc::ConnectionError,
        shutdown: &CancellationToken,
    ) {
        warn!("Broker connection error: {}", e);
        self.status.connection_state = ConnectionState::Reconnecting;
        self.status.reconnects += 1;

        info!(
            "Attempt to reconnect in {} seconds ...",
            self.reconnect_delay.as_secs()
        );
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(self.reconnect_delay) => {}
        }
    }

    // Polls a little longer so the DISCONNECT actually leaves the socket.
    async fn disconnect(&mut self) {
        if self.status.connection_state != ConnectionState::Connected {
            self.status.connection_state = ConnectionState::Disconnected;
            return;
        }
        if let Err(e) = self.client.try_disconnect() {
            warn!("Failed to request disconnect: {}", e);
            return;
        }

        let drain = async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        if tokio::time::timeout(DISCONNECT_GRACE, drain).await.is_err() {
            warn!("Broker did not acknowledge disconnect in time");
        }
        self.status.connection_state = ConnectionState::Disconnected;
    }

    fn touch(&mut self) {
        self.status.last_activity = Some(Local::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> MqttSettings {
        MqttSettings {
            broker: "broker.lab".to_string(),
            port: 1884,
            client_id: "bench-1".to_string(),
            keep_alive_secs: 15,
            connection_timeout_secs: 10,
            reconnect_delay_secs: 5,
            username: Some("lab".to_string()),
            password: None,
        }
    }

    #[test]
    fn options_carry_session_and_last_will() {
        let topics = Topics::new("lab", "em");
        let options = build_options(&settings(), &topics);

        assert_eq!(options.broker_address(), ("broker.lab".to_string(), 1884));
        assert_eq!(options.client_id(), "bench-1");
        assert_eq!(options.keep_alive(), Duration::from_secs(15));
        assert!(!options.clean_session());
        assert_eq!(
            options.credentials(),
            Some(("lab".to_string(), String::new()))
        );

        let will = options.last_will().unwrap();
        assert_eq!(will.topic, "lab/connected/em");
        assert_eq!(&will.message[..], b"0");
        assert!(will.retain);
    }

    #[tokio::test]
    async fn forwards_known_commands_only() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut handler = MqttHandler::new(&settings(), Topics::new("lab", "em"), tx);

        let publish = |topic: &str, payload: &[u8]| {
            Publish::new(topic, QoS::AtLeastOnce, payload.to_vec())
        };
        handler
            .on_message(publish("lab/cmnd/em/source_voltage", br#"{"value": 5}"#))
            .unwrap();
        handler
            .on_message(publish("lab/cmnd/em/teleport", b"{}"))
            .unwrap();
        handler
            .on_message(publish("lab/cmnd/other/current", b"{}"))
            .unwrap();

        assert_eq!(handler.status.messages_received, 3);
        assert_eq!(handler.status.commands_forwarded, 1);
        assert_eq!(
            rx.try_recv().unwrap(),
            Inbound::Command {
                command: Command::SourceVoltage,
                payload: CommandPayload::decode(br#"{"value": 5}"#),
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_worker_stops_the_loop() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut handler = MqttHandler::new(&settings(), Topics::new("lab", "em"), tx);

        let publish = Publish::new("lab/cmnd/em/current", QoS::AtLeastOnce, b"{}".to_vec());
        assert!(matches!(
            handler.on_message(publish),
            Err(BridgeError::ChannelError(_))
        ));
    }
}
