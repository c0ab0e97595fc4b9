//! Error definitions for the instrument side of the bridge

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceError {
    /// The connector could not open the instrument resource
    #[error("Keithley peripheral connection error on {resource}: {reason}")]
    Connect { resource: String, reason: String },

    /// Read or write on an open link failed
    #[error("Keithley peripheral IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Keithley peripheral did not answer `{0}` in time")]
    Timeout(String),

    #[error("Keithley peripheral is not connected")]
    NotConnected,

    /// The instrument answered, but not with what the query asks for
    #[error("Unexpected reply to `{command}`: {reply:?}")]
    Parse { command: String, reply: String },
}

impl DeviceError {
    /// Link failures drop the connection and are reported on the
    /// `error/disconnected` topic; everything else is a command error.
    pub fn is_link_failure(&self) -> bool {
        !matches!(self, Self::Parse { .. })
    }

    pub fn parse(command: &str, reply: &str) -> Self {
        Self::Parse {
            command: command.to_string(),
            reply: reply.to_string(),
        }
    }
}
