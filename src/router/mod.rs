//! Command dispatch between the broker and the instrument
//!
//! - [`command`] - Command names, payload decoding and parameter parsing
//! - [`command_router`] - Dispatch table and response/error publishing
//! - [`worker`] - Single task that owns the router and the measurement timer

pub mod command;
pub mod command_router;
pub mod worker;

pub use command::{Command, CommandPayload};
pub use command_router::CommandRouter;
pub use worker::{run_worker, Inbound};
