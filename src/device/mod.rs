//! Instrument subsystem for the Keithley 6517B electrometer
//!
//! 1. [`transport`] - Line-oriented link and connector traits
//! 2. [`serial`] / [`simulated`] - Real RS-232 link and an in-process model
//! 3. [`keithley`] - SCPI vocabulary, value parsing and range validators
//! 4. [`electrometer`] - Typed-state driver (`Disconnected` / `Connected`)
//! 5. [`adapter`] - Lazy connection handling used by the command router
//!
//! ```text
//! CommandRouter ──► DeviceAdapter ──► Electrometer<Connected> ──► Transport
//!                   (connect/settle)   (SCPI operations)          (serial)
//! ```

pub mod adapter;
pub mod electrometer;
pub mod error;
pub mod keithley;
pub mod serial;
pub mod simulated;
pub mod transport;

pub use adapter::{DeviceAdapter, LinkStatus};
pub use error::DeviceError;
pub use serial::SerialConnector;
pub use simulated::SimulatedConnector;
pub use transport::Connector;
