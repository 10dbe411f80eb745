// Telnet module - IAC negotiation for network targets
pub mod engine;
pub mod protocol;

pub use engine::{Inbound, Outbound, TelnetEngine, TelnetState};
pub use protocol::{Command, TelnetOption, IAC};
