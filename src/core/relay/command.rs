//! The escape-key command menu.

use std::fmt::Write as _;
use std::time::Duration;

use crate::domain::config::{BackspaceKey, EnterKey, HexMode, TimestampMode};

/// How long the menu waits for a line before giving up.
pub const MENU_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuCommand {
    ToggleBackspace,
    CycleEnter,
    ForwardEscape,
    Quit,
    ToggleReconnect,
    CycleTimestamps,
    CycleHex,
    AbortShell,
    Shell(String),
    Help,
    /// Empty line or no input in time
    Resume,
    Invalid(Vec<u8>),
}

impl MenuCommand {
    /// Interpret one menu input line. `k` only exists while a shell command runs.
    pub fn parse(line: &[u8], shell_running: bool) -> Self {
        let line = line.trim_ascii();
        let Some((&first, rest)) = line.split_first() else {
            return MenuCommand::Resume;
        };

        if first == b'!' {
            return MenuCommand::Shell(String::from_utf8_lossy(rest).trim().to_string());
        }
        if !rest.is_empty() {
            return MenuCommand::Invalid(line.to_vec());
        }

        match first {
            b'b' => MenuCommand::ToggleBackspace,
            b'e' => MenuCommand::CycleEnter,
            b'p' => MenuCommand::ForwardEscape,
            b'q' => MenuCommand::Quit,
            b'r' => MenuCommand::ToggleReconnect,
            b's' => MenuCommand::CycleTimestamps,
            b'x' => MenuCommand::CycleHex,
            b'k' if shell_running => MenuCommand::AbortShell,
            b'?' => MenuCommand::Help,
            _ => MenuCommand::Invalid(line.to_vec()),
        }
    }
}

/// Settings shown next to each entry of the help.
#[derive(Debug, Clone, Copy)]
pub struct MenuStatus {
    pub backspace: BackspaceKey,
    pub enter: EnterKey,
    pub reconnect: bool,
    pub timestamps: TimestampMode,
    pub hex: HexMode,
    pub shell_running: bool,
}

pub fn help_text(status: &MenuStatus) -> String {
    let mut help = String::from("Commands:\n\n");
    let _ = writeln!(
        help,
        "    b         - toggle backspace key sends DEL or BS (now {})",
        status.backspace
    );
    let _ = writeln!(
        help,
        "    e         - cycle enter key sends CR, LF, CR+LF, or CR+NUL (now {})",
        status.enter
    );
    help.push_str("    p         - forward ^\\ to target\n");
    help.push_str("    q         - quit\n");
    let _ = writeln!(
        help,
        "    r         - toggle reconnect when the target fails (now {})",
        on_off(status.reconnect)
    );
    let _ = writeln!(
        help,
        "    s         - cycle timestamps off, on, or on with date (now {})",
        status.timestamps
    );
    let _ = writeln!(
        help,
        "    x         - cycle hex output off, on, or all (now {})",
        status.hex
    );
    if status.shell_running {
        help.push_str("    k         - abort the running shell command\n");
    }
    help.push_str(
        "    ! command - pass rest of the line to shell with stdin/stdout connected to target\n",
    );
    help.push_str("\nAn empty line exits command mode.");
    help
}

/// `Invalid command: ...` with unprintable bytes shown as `[XX]`.
pub fn invalid_text(line: &[u8]) -> String {
    let mut text = String::from("Invalid command: ");
    for &byte in line {
        if byte.is_ascii_graphic() || byte == b' ' {
            text.push(byte as char);
        } else {
            let _ = write!(text, "[{}]", hex::encode_upper([byte]));
        }
    }
    text.push('\n');
    text
}

pub fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}
