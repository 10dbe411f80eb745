//! Telnet wire constants.

/// Interpret As Command escape byte.
pub const IAC: u8 = 255;

/// Terminal-type suboption: IS.
pub const TTYPE_IS: u8 = 0;
/// Terminal-type suboption: SEND.
pub const TTYPE_SEND: u8 = 1;

/// Command bytes that may follow IAC.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// End of subnegotiation
    Se = 240,
    Nop = 241,
    DataMark = 242,
    Break = 243,
    InterruptProcess = 244,
    AbortOutput = 245,
    AreYouThere = 246,
    EraseCharacter = 247,
    EraseLine = 248,
    GoAhead = 249,
    /// Start of subnegotiation
    Sb = 250,
    Will = 251,
    Wont = 252,
    Do = 253,
    Dont = 254,
    /// Escaped literal 0xFF
    Iac = 255,
}

impl Command {
    pub fn from_byte(byte: u8) -> Option<Self> {
        let command = match byte {
            240 => Command::Se,
            241 => Command::Nop,
            242 => Command::DataMark,
            243 => Command::Break,
            244 => Command::InterruptProcess,
            245 => Command::AbortOutput,
            246 => Command::AreYouThere,
            247 => Command::EraseCharacter,
            248 => Command::EraseLine,
            249 => Command::GoAhead,
            250 => Command::Sb,
            251 => Command::Will,
            252 => Command::Wont,
            253 => Command::Do,
            254 => Command::Dont,
            255 => Command::Iac,
            _ => return None,
        };
        Some(command)
    }

    pub fn byte(self) -> u8 {
        self as u8
    }
}

/// Options this client knows by name. Everything else is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelnetOption {
    /// RFC 856
    Binary,
    /// RFC 857
    Echo,
    /// RFC 858
    SuppressGoAhead,
    /// RFC 1091
    TerminalType,
    /// RFC 1073
    Naws,
    Other(u8),
}

impl TelnetOption {
    pub fn byte(self) -> u8 {
        match self {
            TelnetOption::Binary => 0,
            TelnetOption::Echo => 1,
            TelnetOption::SuppressGoAhead => 3,
            TelnetOption::TerminalType => 24,
            TelnetOption::Naws => 31,
            TelnetOption::Other(byte) => byte,
        }
    }
}

impl From<u8> for TelnetOption {
    fn from(byte: u8) -> Self {
        match byte {
            0 => TelnetOption::Binary,
            1 => TelnetOption::Echo,
            3 => TelnetOption::SuppressGoAhead,
            24 => TelnetOption::TerminalType,
            31 => TelnetOption::Naws,
            other => TelnetOption::Other(other),
        }
    }
}
