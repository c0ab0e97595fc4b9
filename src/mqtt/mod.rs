//! # MQTT Integration Module
//!
//! Connects the bridge to the broker and owns the topic namespace of the
//! bridged instrument.
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker settings and defaults
//! ├── message_manager.rs  - Outbound messages and the Publisher seam
//! ├── mqtt_handler.rs     - Connection loop, subscription and reconnects
//! └── topics.rs           - Topic layout and command topic parsing
//! ```
//!
//! Inbound commands are handed to the command worker through a bounded
//! channel; everything the worker publishes goes back out through the
//! [`message_manager::Publisher`] implementation of `rumqttc::AsyncClient`.

pub mod config;
pub mod message_manager;
pub mod mqtt_handler;
pub mod topics;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("Channel error: {0}")]
    ChannelError(String),
}
