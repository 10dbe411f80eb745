// CLI module - Command line interface
pub mod args;
pub mod commands;

pub use args::{Args, Command, ConfigCommand, RelayArgs};
pub use commands::{execute_command, run_relay};
