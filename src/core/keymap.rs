use crate::domain::config::{BackspaceKey, EnterKey, KeyConfig};

/// Ctrl-\, opens the command menu.
pub const ESCAPE_KEY: u8 = 0x1C;

const NUL: u8 = 0x00;
const BS: u8 = 0x08;
const LF: u8 = 0x0A;
const CR: u8 = 0x0D;
const DEL: u8 = 0x7F;

/// What a console keystroke turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    /// Open the command menu
    Command,
    /// Send a single byte
    Forward(u8),
    /// Send a fixed sequence
    Sequence(&'static [u8]),
    /// Nothing is sent
    Dropped,
}

impl KeyAction {
    /// Bytes to send, empty for [`KeyAction::Command`] and [`KeyAction::Dropped`].
    pub fn bytes(&self) -> &[u8] {
        match self {
            KeyAction::Forward(byte) => std::slice::from_ref(byte),
            KeyAction::Sequence(bytes) => bytes,
            KeyAction::Command | KeyAction::Dropped => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMapper {
    backspace: BackspaceKey,
    enter: EnterKey,
    forward_all: bool,
}

impl KeyMapper {
    pub fn new(config: &KeyConfig) -> Self {
        Self {
            backspace: config.backspace,
            enter: config.enter,
            forward_all: config.forward_all_input,
        }
    }

    pub fn backspace(&self) -> BackspaceKey {
        self.backspace
    }

    pub fn toggle_backspace(&mut self) -> BackspaceKey {
        self.backspace = self.backspace.toggle();
        self.backspace
    }

    pub fn enter(&self) -> EnterKey {
        self.enter
    }

    pub fn cycle_enter(&mut self) -> EnterKey {
        self.enter = self.enter.next();
        self.enter
    }

    /// Map one byte read from the console.
    ///
    /// The console runs with ICRNL left on, so the Enter key arrives as LF.
    pub fn map(&self, byte: u8) -> KeyAction {
        match byte {
            ESCAPE_KEY => KeyAction::Command,
            BS | DEL => KeyAction::Forward(self.backspace.byte()),
            LF => KeyAction::Sequence(self.enter.bytes()),
            NUL | CR | 0x80..=0xFF if !self.forward_all => KeyAction::Dropped,
            _ => KeyAction::Forward(byte),
        }
    }
}
