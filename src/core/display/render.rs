use std::io::{self, Write};

use chrono::Local;
use tracing::warn;

use super::charset::HighCharTable;
use crate::domain::config::{HexMode, TimestampMode};

const CR: u8 = b'\r';
const LF: u8 = b'\n';

/// Prefix written at the start of each line of shell diagnostics.
pub const SHELL_MARKER: &[u8] = b"| ";

/// Console line discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalMode {
    /// No echo, no line editing, no signals
    Raw,
    /// Original settings without signal keys
    Warm,
    /// Original settings
    Cooked,
}

/// Applies a [`TerminalMode`] to the real terminal.
pub trait ModeSwitch {
    fn apply(&mut self, mode: TerminalMode) -> io::Result<()>;
}

/// Whether the cursor sits at the start of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineState {
    Clean,
    Dirty,
    /// A CR arrived on a dirty line and has not been written yet
    DirtyDeferredCr,
}

/// Renders target bytes onto the console.
pub struct Display<W: Write> {
    out: W,
    mode: TerminalMode,
    line: LineState,
    timestamps: TimestampMode,
    hex: HexMode,
    table: Option<HighCharTable>,
    tee: Option<Box<dyn Write>>,
    shell_marker: bool,
}

impl<W: Write> Display<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            mode: TerminalMode::Cooked,
            line: LineState::Clean,
            timestamps: TimestampMode::Off,
            hex: HexMode::Off,
            table: None,
            tee: None,
            shell_marker: false,
        }
    }

    pub fn with_timestamps(mut self, timestamps: TimestampMode) -> Self {
        self.timestamps = timestamps;
        self
    }

    pub fn with_hex(mut self, hex: HexMode) -> Self {
        self.hex = hex;
        self
    }

    pub fn with_table(mut self, table: Option<HighCharTable>) -> Self {
        self.table = table;
        self
    }

    pub fn with_tee(mut self, tee: Option<Box<dyn Write>>) -> Self {
        self.tee = tee;
        self
    }

    pub fn mode(&self) -> TerminalMode {
        self.mode
    }

    pub fn line(&self) -> LineState {
        self.line
    }

    pub fn timestamps(&self) -> TimestampMode {
        self.timestamps
    }

    pub fn set_timestamps(&mut self, timestamps: TimestampMode) {
        self.timestamps = timestamps;
    }

    pub fn hex(&self) -> HexMode {
        self.hex
    }

    pub fn set_hex(&mut self, hex: HexMode) {
        self.hex = hex;
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.out
    }

    /// Switch terminal mode. Leaving Raw on a dirty line breaks it first.
    pub fn set_mode<S: ModeSwitch + ?Sized>(
        &mut self,
        mode: TerminalMode,
        switch: &mut S,
    ) -> io::Result<()> {
        if mode == self.mode {
            return Ok(());
        }
        if self.mode == TerminalMode::Raw && self.line != LineState::Clean {
            self.out.write_all(b"\r\n")?;
        }
        self.flush()?;
        switch.apply(mode)?;
        self.mode = mode;
        self.line = LineState::Clean;
        Ok(())
    }

    /// Render one byte received from the target.
    pub fn render(&mut self, byte: u8) -> io::Result<()> {
        self.mirror(byte);
        if self.mode != TerminalMode::Raw {
            return self.write_glyph(byte);
        }

        if self.hex == HexMode::All {
            self.begin_text()?;
            self.write_hex(byte)?;
            self.line = LineState::Dirty;
            return Ok(());
        }

        match (byte, self.line) {
            (LF, state) => {
                if state == LineState::Clean {
                    self.line_prefix()?;
                }
                self.out.write_all(b"\r\n")?;
                self.line = LineState::Clean;
            }
            (CR, LineState::Clean) => self.out.write_all(&[CR])?,
            (CR, _) => self.line = LineState::DirtyDeferredCr,
            _ => {
                self.begin_text()?;
                self.write_glyph(byte)?;
                self.line = LineState::Dirty;
            }
        }
        Ok(())
    }

    /// Render bytes from a shell command's diagnostic channel, marking the
    /// lines they start.
    pub fn render_shell(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.shell_marker = true;
        let result = bytes.iter().try_for_each(|&b| self.render(b));
        self.shell_marker = false;
        result
    }

    /// Write a line of our own, starting a fresh line first if needed.
    pub fn notice(&mut self, text: &str) -> io::Result<()> {
        if self.line != LineState::Clean {
            self.out.write_all(b"\r\n")?;
        }
        for (i, part) in text.split('\n').enumerate() {
            if i > 0 {
                self.out.write_all(b"\r\n")?;
            }
            self.out.write_all(part.as_bytes())?;
        }
        self.out.write_all(b"\r\n")?;
        self.line = LineState::Clean;
        self.flush()
    }

    /// Flush the console and the tee.
    pub fn flush(&mut self) -> io::Result<()> {
        if let Some(tee) = self.tee.as_mut() {
            if let Err(e) = tee.flush() {
                warn!("tee flush failed, no longer mirroring: {}", e);
                self.tee = None;
            }
        }
        self.out.flush()
    }

    /// Write any deferred CR and the line prefix before visible text.
    fn begin_text(&mut self) -> io::Result<()> {
        if self.line == LineState::DirtyDeferredCr {
            self.out.write_all(&[CR])?;
            self.line = LineState::Clean;
        }
        if self.line == LineState::Clean {
            self.line_prefix()?;
        }
        Ok(())
    }

    fn line_prefix(&mut self) -> io::Result<()> {
        if let Some(stamp) = timestamp(self.timestamps) {
            self.out.write_all(stamp.as_bytes())?;
        }
        if self.shell_marker {
            self.out.write_all(SHELL_MARKER)?;
        }
        Ok(())
    }

    fn write_glyph(&mut self, byte: u8) -> io::Result<()> {
        let printable = (0x20..=0x7E).contains(&byte);
        let is_line_control = byte == CR || byte == LF;
        if self.hex == HexMode::All
            || (self.hex == HexMode::Unprintable && !printable && !is_line_control)
        {
            return self.write_hex(byte);
        }
        match &self.table {
            Some(table) if byte >= 0x80 => self.out.write_all(table.glyph(byte)),
            _ => self.out.write_all(&[byte]),
        }
    }

    fn write_hex(&mut self, byte: u8) -> io::Result<()> {
        write!(self.out, "[{}]", hex::encode_upper([byte]))
    }

    fn mirror(&mut self, byte: u8) {
        if let Some(tee) = self.tee.as_mut() {
            if let Err(e) = tee.write_all(&[byte]) {
                warn!("tee write failed, no longer mirroring: {}", e);
                self.tee = None;
            }
        }
    }
}

fn timestamp(mode: TimestampMode) -> Option<String> {
    let now = Local::now();
    match mode {
        TimestampMode::Off => None,
        TimestampMode::Time => Some(format!("[{}] ", now.format("%H:%M:%S%.3f"))),
        TimestampMode::DateTime => Some(format!("[{}] ", now.format("%Y-%m-%d %H:%M:%S%.3f"))),
    }
}
