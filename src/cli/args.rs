use clap::{ArgAction, Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::domain::config::{
    BackspaceKey, EnterKey, HexMode, RelayConfig, TelnetMode, TimestampMode,
};

/// Command line arguments for ttyrelay
#[derive(Parser, Debug)]
#[command(
    name = "ttyrelay",
    version = env!("CARGO_PKG_VERSION"),
    about = "Connect the current tty to a serial device or TCP host",
    long_about = "Connect the current tty to a target, which is a serial device if it contains a '/' \
                  or a TCP host if it contains a ':'. Press CTRL-\\ for the command menu.",
    args_conflicts_with_subcommands = true
)]
pub struct Args {
    /// Serial device (/dev/ttyX) or TCP host:port
    pub target: Option<String>,

    #[command(flatten)]
    pub relay: RelayArgs,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Write diagnostics to this file instead of stderr
    #[arg(long, global = true, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Session options; each one overrides the configuration file.
#[derive(ClapArgs, Debug, Default)]
pub struct RelayArgs {
    /// Backspace key sends DEL instead of BS
    #[arg(short = 'b', long)]
    pub backspace_del: bool,

    /// Toggle serial port DTR high on start
    #[arg(short = 'd', long)]
    pub toggle_dtr: bool,

    /// Enter key sends LF instead of CR, 2X to send CR+LF, 3X to send CR+NUL
    #[arg(short = 'e', long = "enter", action = ArgAction::Count)]
    pub enter: u8,

    /// Tee received data to the specified file
    #[arg(short = 'f', long = "tee", value_name = "FILE")]
    pub tee: Option<PathBuf>,

    /// Character set for high characters, empty string to pass verbatim
    #[arg(short = 'i', long, value_name = "ENCODING")]
    pub encoding: Option<String>,

    /// Don't set the serial port to 115200 N-8-1, use it as is
    #[arg(short = 'n', long)]
    pub native: bool,

    /// Try to reconnect the target if it won't open or closes with error
    #[arg(short = 'r', long)]
    pub reconnect: bool,

    /// Enable timestamps, 2X to also show date
    #[arg(short = 's', long = "timestamps", action = ArgAction::Count)]
    pub timestamps: u8,

    /// Enable telnet IAC handling, 2X to disable BINARY
    #[arg(short = 't', long = "telnet", action = ArgAction::Count)]
    pub telnet: u8,

    /// Show unprintable chars as hex, 2X to show all chars as hex
    #[arg(short = 'x', long = "hex", action = ArgAction::Count)]
    pub hex: u8,

    /// Forward NUL, CR and high characters typed on the console
    #[arg(long)]
    pub forward_all: bool,
}

impl RelayArgs {
    /// Overlay the options that were given onto `config`.
    pub fn apply(&self, config: &mut RelayConfig) {
        if self.backspace_del {
            config.keys.backspace = BackspaceKey::Del;
        }
        if self.forward_all {
            config.keys.forward_all_input = true;
        }
        config.keys.enter = match self.enter {
            0 => config.keys.enter,
            1 => EnterKey::Lf,
            2 => EnterKey::CrLf,
            _ => EnterKey::CrNul,
        };
        config.display.timestamps = match self.timestamps {
            0 => config.display.timestamps,
            1 => TimestampMode::Time,
            _ => TimestampMode::DateTime,
        };
        config.display.hex = match self.hex {
            0 => config.display.hex,
            1 => HexMode::Unprintable,
            _ => HexMode::All,
        };
        config.telnet.mode = match self.telnet {
            0 => config.telnet.mode,
            1 => TelnetMode::Binary,
            _ => TelnetMode::Ascii,
        };
        if let Some(tee) = &self.tee {
            config.display.tee_file = Some(tee.clone());
        }
        if let Some(encoding) = &self.encoding {
            config.display.encoding = Some(encoding.clone());
        }
        if self.native {
            config.serial.native = true;
        }
        if self.toggle_dtr {
            config.serial.toggle_dtr = true;
        }
        if self.reconnect {
            config.connection.reconnect = true;
        }
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Configuration management commands
    Config(ConfigArgs),
}

/// Configuration management arguments
#[derive(ClapArgs, Debug)]
pub struct ConfigArgs {
    /// Configuration subcommand
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show,
    /// Validate configuration
    Validate {
        /// Configuration file path
        file: Option<PathBuf>,
    },
    /// Create default configuration
    Init {
        /// Directory to create the project configuration in
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Initialize global configuration instead
        #[arg(short, long)]
        global: bool,
    },
}
