use std::env;

use tracing::debug;

use super::protocol::{Command, TelnetOption, IAC, TTYPE_IS, TTYPE_SEND};
use crate::core::queue::ByteQueue;

const CR: u8 = b'\r';
const NUL: u8 = 0;

const MIN_COLS: u32 = 8;
const MIN_ROWS: u32 = 2;
const MAX_DIMENSION: u32 = 65535;

/// Where the inbound parser is within an IAC sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TelnetState {
    #[default]
    Idle,
    IacSeen,
    Will,
    Wont,
    Do,
    Dont,
    /// First byte after IAC SB
    SubNegStart,
    /// Inside a terminal-type suboption, expecting SEND
    SubNegTermType,
    /// Ignoring suboption bytes until IAC
    SubNegSwallow,
    /// IAC seen inside a suboption
    SubNegEnd,
}

impl TelnetState {
    /// State entered when `command` follows IAC. `Command::Iac` is a literal
    /// byte and is handled by the caller.
    pub fn after_command(command: Option<Command>) -> Self {
        match command {
            Some(Command::Will) => TelnetState::Will,
            Some(Command::Wont) => TelnetState::Wont,
            Some(Command::Do) => TelnetState::Do,
            Some(Command::Dont) => TelnetState::Dont,
            Some(Command::Sb) => TelnetState::SubNegStart,
            _ => TelnetState::Idle,
        }
    }

    fn is_negotiation(self) -> bool {
        matches!(
            self,
            TelnetState::Will
                | TelnetState::Wont
                | TelnetState::Do
                | TelnetState::Dont
                | TelnetState::SubNegStart
        )
    }
}

/// What the caller does with an inbound byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    /// Hand this byte to the display
    Deliver(u8),
    /// Part of a negotiation, nothing to display
    Consumed,
}

/// What the caller does with an outbound byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outbound {
    /// Queue the byte unchanged
    Forward,
    /// The engine already queued its encoding
    Suppressed,
}

/// Client side of a telnet session's option negotiation.
///
/// Replies are written into whichever queue the caller passes; the engine
/// holds no reference to the connection.
#[derive(Debug, Clone)]
pub struct TelnetEngine {
    state: TelnetState,
    binary: bool,
    terminal_type: Option<String>,
    initialized: bool,
    ascii_saw_cr: bool,
    advertise_naws: bool,
    peer_wants_naws: bool,
    window: (u16, u16),
}

impl TelnetEngine {
    pub fn new(binary: bool, terminal_type: Option<String>) -> Self {
        Self {
            state: TelnetState::Idle,
            binary,
            terminal_type,
            initialized: false,
            ascii_saw_cr: false,
            advertise_naws: false,
            peer_wants_naws: false,
            window: (80, 24),
        }
    }

    /// Terminal type from `$TERM`, `dumb` when unset or empty.
    pub fn terminal_type_from_env() -> String {
        env::var("TERM")
            .ok()
            .filter(|term| !term.is_empty())
            .unwrap_or_else(|| "dumb".to_string())
    }

    pub fn state(&self) -> TelnetState {
        self.state
    }

    pub fn is_binary(&self) -> bool {
        self.binary
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn window(&self) -> (u16, u16) {
        self.window
    }

    /// Forget per-connection negotiation. Called after every (re)connect.
    pub fn reset(&mut self) {
        self.state = TelnetState::Idle;
        self.initialized = false;
        self.ascii_saw_cr = false;
        self.peer_wants_naws = false;
    }

    /// Prepare a byte for the wire.
    pub fn feed_outbound(&self, byte: u8, out: &mut ByteQueue) -> Outbound {
        if byte == IAC {
            out.append(&[IAC, IAC]);
            return Outbound::Suppressed;
        }
        if !self.binary && byte == CR {
            out.append(&[CR, NUL]);
            return Outbound::Suppressed;
        }
        Outbound::Forward
    }

    /// Run one received byte through the negotiation state machine.
    pub fn feed_inbound(&mut self, byte: u8, out: &mut ByteQueue) -> Inbound {
        match self.state {
            TelnetState::Idle => return self.idle(byte),
            TelnetState::IacSeen => {
                if byte == IAC {
                    self.state = TelnetState::Idle;
                    self.ascii_saw_cr = false;
                    return Inbound::Deliver(IAC);
                }
                self.state = TelnetState::after_command(Command::from_byte(byte));
                if self.state.is_negotiation() && !self.initialized {
                    self.send_initial_requests(out);
                }
            }
            TelnetState::Will => {
                self.state = TelnetState::Idle;
                self.on_will(TelnetOption::from(byte), out);
            }
            TelnetState::Do => {
                self.state = TelnetState::Idle;
                self.on_do(TelnetOption::from(byte), out);
            }
            TelnetState::Wont | TelnetState::Dont => {
                self.state = TelnetState::Idle;
            }
            TelnetState::SubNegStart => {
                self.state = if byte == IAC {
                    TelnetState::SubNegEnd
                } else if byte == TelnetOption::TerminalType.byte() && self.terminal_type.is_some() {
                    TelnetState::SubNegTermType
                } else {
                    TelnetState::SubNegSwallow
                };
            }
            TelnetState::SubNegTermType => {
                if byte == IAC {
                    self.state = TelnetState::SubNegEnd;
                } else {
                    if byte == TTYPE_SEND {
                        self.send_terminal_type(out);
                    }
                    self.state = TelnetState::SubNegSwallow;
                }
            }
            TelnetState::SubNegSwallow => {
                if byte == IAC {
                    self.state = TelnetState::SubNegEnd;
                }
            }
            TelnetState::SubNegEnd => {
                self.state = if byte == Command::Se.byte() {
                    TelnetState::Idle
                } else {
                    TelnetState::SubNegSwallow
                };
            }
        }
        Inbound::Consumed
    }

    /// Record the local window size, clamped to what NAWS can carry.
    ///
    /// The first call starts advertising NAWS; later calls push the new size
    /// if the server asked for it.
    pub fn notify_resize(&mut self, cols: u32, rows: u32, out: &mut ByteQueue) {
        let cols = cols.clamp(MIN_COLS, MAX_DIMENSION) as u16;
        let rows = rows.clamp(MIN_ROWS, MAX_DIMENSION) as u16;
        self.window = (cols, rows);

        if !self.advertise_naws {
            self.advertise_naws = true;
            if self.initialized {
                send_negotiation(out, Command::Will, TelnetOption::Naws);
            }
        } else if self.peer_wants_naws {
            self.send_window_size(out);
        }
    }

    fn idle(&mut self, byte: u8) -> Inbound {
        if byte == IAC {
            self.state = TelnetState::IacSeen;
            return Inbound::Consumed;
        }
        if !self.binary {
            if byte == NUL && self.ascii_saw_cr {
                self.ascii_saw_cr = false;
                return Inbound::Consumed;
            }
            self.ascii_saw_cr = byte == CR;
        }
        Inbound::Deliver(byte)
    }

    fn send_initial_requests(&mut self, out: &mut ByteQueue) {
        debug!("telnet peer detected, sending initial option requests");
        send_negotiation(out, Command::Do, TelnetOption::SuppressGoAhead);
        send_negotiation(out, Command::Will, TelnetOption::SuppressGoAhead);
        if self.terminal_type.is_some() {
            send_negotiation(out, Command::Will, TelnetOption::TerminalType);
        }
        send_negotiation(out, Command::Do, TelnetOption::Echo);
        if self.binary {
            send_negotiation(out, Command::Do, TelnetOption::Binary);
            send_negotiation(out, Command::Will, TelnetOption::Binary);
        }
        if self.advertise_naws {
            send_negotiation(out, Command::Will, TelnetOption::Naws);
        }
        self.initialized = true;
    }

    fn on_will(&mut self, option: TelnetOption, out: &mut ByteQueue) {
        let accept = match option {
            TelnetOption::SuppressGoAhead | TelnetOption::Echo => true,
            TelnetOption::Binary => self.binary,
            _ => false,
        };
        if !accept {
            debug!(?option, "refusing WILL");
            send_negotiation(out, Command::Dont, option);
        }
    }

    fn on_do(&mut self, option: TelnetOption, out: &mut ByteQueue) {
        let accept = match option {
            TelnetOption::SuppressGoAhead => true,
            TelnetOption::Binary => self.binary,
            TelnetOption::TerminalType => self.terminal_type.is_some(),
            TelnetOption::Naws => self.advertise_naws,
            _ => false,
        };
        if !accept {
            debug!(?option, "refusing DO");
            send_negotiation(out, Command::Wont, option);
            return;
        }
        if option == TelnetOption::Naws {
            self.peer_wants_naws = true;
            self.send_window_size(out);
        }
    }

    fn send_terminal_type(&self, out: &mut ByteQueue) {
        if let Some(terminal_type) = &self.terminal_type {
            out.append(&[
                IAC,
                Command::Sb.byte(),
                TelnetOption::TerminalType.byte(),
                TTYPE_IS,
            ]);
            out.append(terminal_type.as_bytes());
            out.append(&[IAC, Command::Se.byte()]);
        }
    }

    fn send_window_size(&self, out: &mut ByteQueue) {
        let (cols, rows) = self.window;
        out.append(&[IAC, Command::Sb.byte(), TelnetOption::Naws.byte()]);
        for byte in cols.to_be_bytes().into_iter().chain(rows.to_be_bytes()) {
            if byte == IAC {
                out.append(&[IAC, IAC]);
            } else {
                out.append(&[byte]);
            }
        }
        out.append(&[IAC, Command::Se.byte()]);
    }
}

fn send_negotiation(out: &mut ByteQueue, command: Command, option: TelnetOption) {
    out.append(&[IAC, command.byte(), option.byte()]);
}

#[cfg(test)]
mod tests {
    use super::*;

    const SB: u8 = 250;
    const SE: u8 = 240;
    const WILL: u8 = 251;
    const WONT: u8 = 252;
    const DO: u8 = 253;
    const DONT: u8 = 254;

    fn feed(engine: &mut TelnetEngine, bytes: &[u8], out: &mut ByteQueue) -> Vec<u8> {
        bytes
            .iter()
            .filter_map(|&b| match engine.feed_inbound(b, out) {
                Inbound::Deliver(b) => Some(b),
                Inbound::Consumed => None,
            })
            .collect()
    }

    fn queued(out: &mut ByteQueue) -> Vec<u8> {
        let mut bytes = Vec::new();
        while !out.is_empty() {
            let run = out.peek().to_vec();
            out.consume(run.len());
            bytes.extend(run);
        }
        bytes
    }

    /// Engine that has already sent its initial requests.
    fn negotiated(binary: bool, terminal_type: Option<&str>) -> (TelnetEngine, ByteQueue) {
        let mut engine = TelnetEngine::new(binary, terminal_type.map(str::to_string));
        let mut out = ByteQueue::new();
        feed(&mut engine, &[IAC, WONT, 1], &mut out);
        out.clear();
        (engine, out)
    }

    #[test]
    fn test_escaped_iac_delivers_single_byte() {
        let mut engine = TelnetEngine::new(true, None);
        let mut out = ByteQueue::new();

        let delivered = feed(&mut engine, &[IAC, IAC], &mut out);

        assert_eq!(delivered, vec![0xFF]);
        assert_eq!(engine.state(), TelnetState::Idle);
        assert!(out.is_empty());
        assert!(!engine.is_initialized());
    }

    #[test]
    fn test_first_negotiation_sends_initial_requests() {
        let mut engine = TelnetEngine::new(true, Some("vt100".to_string()));
        let mut out = ByteQueue::new();

        feed(&mut engine, &[IAC, WILL, 3], &mut out);

        assert!(engine.is_initialized());
        assert_eq!(
            queued(&mut out),
            vec![
                IAC, DO, 3, IAC, WILL, 3, IAC, WILL, 24, IAC, DO, 1, IAC, DO, 0, IAC, WILL, 0,
            ]
        );
    }

    #[test]
    fn test_ascii_initial_requests_skip_binary() {
        let mut engine = TelnetEngine::new(false, None);
        let mut out = ByteQueue::new();

        feed(&mut engine, &[IAC, DONT, 0], &mut out);

        assert_eq!(queued(&mut out), vec![IAC, DO, 3, IAC, WILL, 3, IAC, DO, 1]);
    }

    #[test]
    fn test_two_byte_command_does_not_initialize() {
        let mut engine = TelnetEngine::new(true, None);
        let mut out = ByteQueue::new();

        // IAC NOP then plain text
        let delivered = feed(&mut engine, &[IAC, 241, b'x'], &mut out);

        assert_eq!(delivered, b"x");
        assert!(out.is_empty());
        assert!(!engine.is_initialized());
    }

    #[test]
    fn test_unknown_do_refused_once() {
        let (mut engine, mut out) = negotiated(true, None);

        feed(&mut engine, &[IAC, DO, 42], &mut out);

        assert_eq!(queued(&mut out), vec![IAC, WONT, 42]);
        assert_eq!(engine.state(), TelnetState::Idle);
    }

    #[test]
    fn test_unknown_will_refused() {
        let (mut engine, mut out) = negotiated(true, None);

        feed(&mut engine, &[IAC, WILL, 42, IAC, WILL, 1, IAC, WILL, 3], &mut out);

        assert_eq!(queued(&mut out), vec![IAC, DONT, 42]);
    }

    #[test]
    fn test_binary_refused_in_ascii_mode() {
        let (mut engine, mut out) = negotiated(false, None);

        feed(&mut engine, &[IAC, WILL, 0, IAC, DO, 0], &mut out);

        assert_eq!(queued(&mut out), vec![IAC, DONT, 0, IAC, WONT, 0]);
    }

    #[test]
    fn test_terminal_type_refused_when_unset() {
        let (mut engine, mut out) = negotiated(true, None);

        feed(&mut engine, &[IAC, DO, 24], &mut out);

        assert_eq!(queued(&mut out), vec![IAC, WONT, 24]);
    }

    #[test]
    fn test_terminal_type_send_is_answered() {
        let (mut engine, mut out) = negotiated(true, Some("xterm"));

        let delivered = feed(
            &mut engine,
            &[IAC, DO, 24, IAC, SB, 24, TTYPE_SEND, IAC, SE, b'k'],
            &mut out,
        );

        let mut expected = vec![IAC, SB, 24, 0];
        expected.extend_from_slice(b"xterm");
        expected.extend_from_slice(&[IAC, SE]);
        assert_eq!(queued(&mut out), expected);
        assert_eq!(delivered, b"k");
    }

    #[test]
    fn test_unknown_suboption_swallowed() {
        let (mut engine, mut out) = negotiated(true, None);

        let delivered = feed(
            &mut engine,
            &[IAC, SB, 42, 1, 2, IAC, 7, 3, IAC, SE, b'o', b'k'],
            &mut out,
        );

        assert_eq!(delivered, b"ok");
        assert!(out.is_empty());
    }

    #[test]
    fn test_naws_reply_matches_last_resize() {
        let (mut engine, mut out) = negotiated(true, None);

        engine.notify_resize(132, 43, &mut out);
        // Already initialized, so the first resize offers NAWS.
        assert_eq!(queued(&mut out), vec![IAC, WILL, 31]);

        engine.notify_resize(100, 30, &mut out);
        assert!(out.is_empty());

        feed(&mut engine, &[IAC, DO, 31], &mut out);
        assert_eq!(queued(&mut out), vec![IAC, SB, 31, 0, 100, 0, 30, IAC, SE]);

        engine.notify_resize(200, 50, &mut out);
        assert_eq!(queued(&mut out), vec![IAC, SB, 31, 0, 200, 0, 50, IAC, SE]);
    }

    #[test]
    fn test_naws_refused_until_advertised() {
        let (mut engine, mut out) = negotiated(true, None);

        feed(&mut engine, &[IAC, DO, 31], &mut out);

        assert_eq!(queued(&mut out), vec![IAC, WONT, 31]);
    }

    #[test]
    fn test_naws_payload_escapes_iac_and_clamps() {
        let (mut engine, mut out) = negotiated(true, None);
        engine.notify_resize(80, 24, &mut out);
        feed(&mut engine, &[IAC, DO, 31], &mut out);
        out.clear();

        engine.notify_resize(255, 1, &mut out);

        assert_eq!(engine.window(), (255, 2));
        assert_eq!(
            queued(&mut out),
            vec![IAC, SB, 31, 0, IAC, IAC, 0, 2, IAC, SE]
        );

        engine.notify_resize(0, 100_000, &mut out);
        assert_eq!(engine.window(), (8, 65535));
    }

    #[test]
    fn test_initial_requests_include_naws_when_advertised() {
        let mut engine = TelnetEngine::new(true, None);
        let mut out = ByteQueue::new();

        engine.notify_resize(80, 24, &mut out);
        assert!(out.is_empty());

        feed(&mut engine, &[IAC, DO, 3], &mut out);
        let bytes = queued(&mut out);
        assert!(bytes.ends_with(&[IAC, WILL, 31]));
    }

    #[test]
    fn test_ascii_cr_round_trip() {
        let mut engine = TelnetEngine::new(false, None);
        let mut wire = ByteQueue::new();

        assert_eq!(engine.feed_outbound(CR, &mut wire), Outbound::Suppressed);
        let bytes = queued(&mut wire);
        assert_eq!(bytes, vec![CR, NUL]);

        let mut replies = ByteQueue::new();
        let delivered = feed(&mut engine, &bytes, &mut replies);
        assert_eq!(delivered, vec![CR]);
    }

    #[test]
    fn test_nul_without_cr_is_delivered() {
        let mut engine = TelnetEngine::new(false, None);
        let mut out = ByteQueue::new();

        let delivered = feed(&mut engine, &[NUL, CR, b'a', NUL], &mut out);

        assert_eq!(delivered, vec![NUL, CR, b'a', NUL]);
    }

    #[test]
    fn test_binary_mode_passes_cr_and_doubles_iac() {
        let engine = TelnetEngine::new(true, None);
        let mut wire = ByteQueue::new();

        assert_eq!(engine.feed_outbound(CR, &mut wire), Outbound::Forward);
        assert_eq!(engine.feed_outbound(b'A', &mut wire), Outbound::Forward);
        assert!(wire.is_empty());

        assert_eq!(engine.feed_outbound(IAC, &mut wire), Outbound::Suppressed);
        assert_eq!(queued(&mut wire), vec![IAC, IAC]);
    }

    #[test]
    fn test_reset_renegotiates() {
        let (mut engine, mut out) = negotiated(true, None);
        engine.notify_resize(80, 24, &mut out);
        feed(&mut engine, &[IAC, DO, 31, IAC], &mut out);
        out.clear();

        engine.reset();
        assert_eq!(engine.state(), TelnetState::Idle);
        assert!(!engine.is_initialized());

        // The size is still advertised, but the new peer has not asked for it.
        engine.notify_resize(90, 30, &mut out);
        assert!(out.is_empty());

        feed(&mut engine, &[IAC, WILL, 1], &mut out);
        assert!(engine.is_initialized());
        assert!(queued(&mut out).ends_with(&[IAC, WILL, 31]));
    }
}
