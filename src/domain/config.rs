use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// ttyrelay configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Global configuration
    #[serde(default)]
    pub global: GlobalConfig,
    /// Console key mapping
    #[serde(default)]
    pub keys: KeyConfig,
    /// Rendering of target output
    #[serde(default)]
    pub display: DisplayConfig,
    /// Telnet negotiation
    #[serde(default)]
    pub telnet: TelnetConfig,
    /// Serial device settings
    #[serde(default)]
    pub serial: SerialConfig,
    /// Connection lifecycle
    #[serde(default)]
    pub connection: ConnectionConfig,
}

/// Global configuration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Default log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log file; diagnostics go to stderr when unset
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyConfig {
    /// Byte sent for the backspace key
    #[serde(default)]
    pub backspace: BackspaceKey,
    /// Sequence sent for the enter key
    #[serde(default)]
    pub enter: EnterKey,
    /// Forward NUL, CR and high characters typed on the console instead of dropping them
    #[serde(default)]
    pub forward_all_input: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default)]
    pub timestamps: TimestampMode,
    #[serde(default)]
    pub hex: HexMode,
    /// Character set for bytes 128-255, empty string passes them verbatim
    #[serde(default)]
    pub encoding: Option<String>,
    /// Tee received data to this file
    #[serde(default)]
    pub tee_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelnetConfig {
    #[serde(default)]
    pub mode: TelnetMode,
    /// Terminal type reported to the server, `$TERM` when unset
    #[serde(default)]
    pub terminal_type: Option<String>,
    /// Offer window size updates
    #[serde(default = "default_naws")]
    pub naws: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Leave the port's line settings alone
    #[serde(default)]
    pub native: bool,
    /// Toggle DTR after opening to reset the target
    #[serde(default)]
    pub toggle_dtr: bool,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Keep retrying when the target won't open or drops
    #[serde(default)]
    pub reconnect: bool,
    #[serde(default = "default_retry_interval")]
    pub retry_interval_ms: u64,
}

/// Byte sent to the target for the backspace key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackspaceKey {
    #[default]
    Bs,
    Del,
}

impl BackspaceKey {
    pub fn toggle(self) -> Self {
        match self {
            BackspaceKey::Bs => BackspaceKey::Del,
            BackspaceKey::Del => BackspaceKey::Bs,
        }
    }

    pub fn byte(self) -> u8 {
        match self {
            BackspaceKey::Bs => 0x08,
            BackspaceKey::Del => 0x7f,
        }
    }
}

/// Sequence sent to the target for the enter key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnterKey {
    #[default]
    Cr,
    Lf,
    CrLf,
    CrNul,
}

impl EnterKey {
    pub fn next(self) -> Self {
        match self {
            EnterKey::Cr => EnterKey::Lf,
            EnterKey::Lf => EnterKey::CrLf,
            EnterKey::CrLf => EnterKey::CrNul,
            EnterKey::CrNul => EnterKey::Cr,
        }
    }

    pub fn bytes(self) -> &'static [u8] {
        match self {
            EnterKey::Cr => b"\r",
            EnterKey::Lf => b"\n",
            EnterKey::CrLf => b"\r\n",
            EnterKey::CrNul => b"\r\0",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampMode {
    #[default]
    Off,
    Time,
    DateTime,
}

impl TimestampMode {
    pub fn next(self) -> Self {
        match self {
            TimestampMode::Off => TimestampMode::Time,
            TimestampMode::Time => TimestampMode::DateTime,
            TimestampMode::DateTime => TimestampMode::Off,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HexMode {
    #[default]
    Off,
    Unprintable,
    All,
}

impl HexMode {
    pub fn next(self) -> Self {
        match self {
            HexMode::Off => HexMode::Unprintable,
            HexMode::Unprintable => HexMode::All,
            HexMode::All => HexMode::Off,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelnetMode {
    #[default]
    Off,
    /// Negotiate BINARY, CR is sent unquoted
    Binary,
    /// Refuse BINARY, CR is quoted as CR NUL
    Ascii,
}

impl fmt::Display for BackspaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackspaceKey::Bs => write!(f, "BS"),
            BackspaceKey::Del => write!(f, "DEL"),
        }
    }
}

impl fmt::Display for EnterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnterKey::Cr => write!(f, "CR"),
            EnterKey::Lf => write!(f, "LF"),
            EnterKey::CrLf => write!(f, "CR+LF"),
            EnterKey::CrNul => write!(f, "CR+NUL"),
        }
    }
}

impl fmt::Display for TimestampMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestampMode::Off => write!(f, "off"),
            TimestampMode::Time => write!(f, "on"),
            TimestampMode::DateTime => write!(f, "on with date"),
        }
    }
}

impl fmt::Display for HexMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HexMode::Off => write!(f, "off"),
            HexMode::Unprintable => write!(f, "on"),
            HexMode::All => write!(f, "all"),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "warn".to_string()
}

fn default_naws() -> bool {
    true
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_retry_interval() -> u64 {
    1000
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

impl Default for TelnetConfig {
    fn default() -> Self {
        Self {
            mode: TelnetMode::default(),
            terminal_type: None,
            naws: default_naws(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            native: false,
            toggle_dtr: false,
            baud_rate: default_baud_rate(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect: false,
            retry_interval_ms: default_retry_interval(),
        }
    }
}
