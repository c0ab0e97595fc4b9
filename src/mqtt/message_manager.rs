use super::BridgeError;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use rumqttc::{AsyncClient, QoS};
use std::fmt;

/// A message on its way to the broker.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
    pub timestamp: NaiveDateTime,
}

impl fmt::Display for OutboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let preview: String = self.payload.chars().take(64).collect();
        write!(f, "{} - {}: {}", self.timestamp, self.topic, preview)
    }
}

impl OutboundMessage {
    pub fn new(topic: String, payload: String) -> Self {
        OutboundMessage {
            topic,
            payload,
            retain: false,
            timestamp: chrono::Local::now().naive_local(),
        }
    }

    pub fn retained(topic: String, payload: String) -> Self {
        OutboundMessage {
            retain: true,
            ..Self::new(topic, payload)
        }
    }
}

/// Sink for everything the router publishes.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish_message(&self, message: OutboundMessage) -> Result<(), BridgeError>;
}

// Never waits on the request queue: the event loop may be busy reconnecting.
#[async_trait]
impl Publisher for AsyncClient {
    async fn publish_message(&self, message: OutboundMessage) -> Result<(), BridgeError> {
        self.try_publish(
            message.topic,
            QoS::AtLeastOnce,
            message.retain,
            message.payload.into_bytes(),
        )?;
        Ok(())
    }
}

#[cfg(test)]
pub use recording::RecordingPublisher;

#[cfg(test)]
mod recording {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Keeps every published message for later inspection.
    #[derive(Clone, Default)]
    pub struct RecordingPublisher {
        messages: Arc<Mutex<Vec<OutboundMessage>>>,
    }

    impl RecordingPublisher {
        pub fn messages(&self) -> Vec<OutboundMessage> {
            self.messages.lock().unwrap().clone()
        }

        pub fn on_topic(&self, topic: &str) -> Vec<OutboundMessage> {
            self.messages()
                .into_iter()
                .filter(|m| m.topic == topic)
                .collect()
        }

        pub fn clear(&self) {
            self.messages.lock().unwrap().clear();
        }
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish_message(&self, message: OutboundMessage) -> Result<(), BridgeError> {
            self.messages.lock().unwrap().push(message);
            Ok(())
        }
    }
}
