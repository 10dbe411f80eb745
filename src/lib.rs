//! ttyrelay Library
//!
//! Relays the controlling terminal to a serial device or TCP host, with
//! telnet negotiation and a bridge for local shell commands.

pub mod cli;
pub mod core;
pub mod domain;
pub mod infrastructure;

pub use core::relay::Relay;
pub use domain::config::RelayConfig;
pub use domain::error::{RelayError, RelayResult};
