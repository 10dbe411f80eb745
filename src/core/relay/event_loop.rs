use std::io::{self, Write};
use std::time::Duration;

use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::bridge::ShellEnd;
use super::command::{help_text, invalid_text, on_off, MenuCommand, MenuStatus, MENU_TIMEOUT};
use crate::core::display::{Display, ModeSwitch, TerminalMode};
use crate::core::keymap::{KeyAction, KeyMapper, ESCAPE_KEY};
use crate::core::queue::{ByteQueue, READ_CHUNK};
use crate::core::telnet::{Inbound, Outbound, TelnetEngine};
use crate::domain::config::KeyConfig;
use crate::domain::error::{RelayError, RelayResult};
use crate::infrastructure::connection::{ConnectionManager, Connector, Link};
use crate::infrastructure::console::window_size;
use crate::infrastructure::nonblocking::AsyncFile;
use crate::infrastructure::process::EscalationPolicy;

/// Queue bytes for the target, escaping them when telnet is active.
pub fn encode_outbound(telnet: Option<&TelnetEngine>, bytes: &[u8], queue: &mut ByteQueue) {
    match telnet {
        Some(engine) => {
            for &byte in bytes {
                if engine.feed_outbound(byte, queue) == Outbound::Forward {
                    queue.append(&[byte]);
                }
            }
        }
        None => queue.append(bytes),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SignalEvent {
    Resize,
    Terminate,
}

/// Signals the relay reacts to while it runs.
pub(crate) struct RelaySignals {
    resize: Signal,
    terminate: Signal,
    hangup: Signal,
}

impl RelaySignals {
    pub(crate) fn new() -> io::Result<Self> {
        Ok(Self {
            resize: signal(SignalKind::window_change())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    pub(crate) async fn recv(&mut self) -> SignalEvent {
        tokio::select! {
            _ = self.resize.recv() => SignalEvent::Resize,
            _ = self.terminate.recv() => SignalEvent::Terminate,
            _ = self.hangup.recv() => SignalEvent::Terminate,
        }
    }

    /// Wait for SIGTERM or SIGHUP only.
    pub(crate) async fn terminated(&mut self) {
        tokio::select! {
            _ = self.terminate.recv() => {}
            _ = self.hangup.recv() => {}
        }
    }
}

/// What the command menu asks the caller to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MenuOutcome {
    Resume,
    Quit,
    RunShell(String),
    AbortShell,
}

enum Event {
    Console(io::Result<usize>),
    Target(io::Result<usize>),
    Sent(io::Result<usize>),
    Signal(SignalEvent),
}

/// Relays bytes between the console and one target until the user quits.
pub struct Relay<W: Write, S: ModeSwitch, C: Connector> {
    pub(super) console: AsyncFile,
    pub(super) display: Display<W>,
    pub(super) switch: S,
    pub(super) keys: KeyMapper,
    pub(super) telnet: Option<TelnetEngine>,
    pub(super) naws: bool,
    pub(super) outbound: ByteQueue,
    pub(super) connections: ConnectionManager<C>,
    pub(super) policy: EscalationPolicy,
    pub(super) menu_timeout: Duration,
}

impl<W: Write, S: ModeSwitch, C: Connector> Relay<W, S, C> {
    pub fn new(
        console: AsyncFile,
        display: Display<W>,
        switch: S,
        connections: ConnectionManager<C>,
    ) -> Self {
        Self {
            console,
            display,
            switch,
            keys: KeyMapper::new(&KeyConfig::default()),
            telnet: None,
            naws: false,
            outbound: ByteQueue::new(),
            connections,
            policy: EscalationPolicy::default(),
            menu_timeout: MENU_TIMEOUT,
        }
    }

    pub fn with_keys(mut self, keys: KeyMapper) -> Self {
        self.keys = keys;
        self
    }

    /// Speak telnet to the target. `naws` offers window size updates.
    pub fn with_telnet(mut self, telnet: Option<TelnetEngine>, naws: bool) -> Self {
        self.telnet = telnet;
        self.naws = naws;
        self
    }

    pub fn with_policy(mut self, policy: EscalationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_menu_timeout(mut self, menu_timeout: Duration) -> Self {
        self.menu_timeout = menu_timeout;
        self
    }

    pub fn display(&self) -> &Display<W> {
        &self.display
    }

    pub fn keys(&self) -> &KeyMapper {
        &self.keys
    }

    pub fn connections(&self) -> &ConnectionManager<C> {
        &self.connections
    }

    /// Connect and relay until the user quits or a signal asks us to stop.
    pub async fn run(&mut self) -> RelayResult<()> {
        let mut signals = RelaySignals::new()?;
        let Some(mut link) = self.connect(None, &mut signals).await? else {
            return self.finish();
        };

        let mut input = [0u8; READ_CHUNK];
        let mut received = [0u8; READ_CHUNK];

        loop {
            let event = tokio::select! {
                r = self.console.read(&mut input) => Event::Console(r),
                r = link.io().read(&mut received) => Event::Target(r),
                r = link.io().drain(&mut self.outbound), if !self.outbound.is_empty() => Event::Sent(r),
                sig = signals.recv() => Event::Signal(sig),
            };

            let mut lost = false;
            match event {
                Event::Console(Ok(0)) => {
                    return Err(RelayError::Console("console input closed".to_string()));
                }
                Event::Console(Ok(n)) => match self.handle_keys(&input[..n], None).await? {
                    MenuOutcome::Quit => return self.finish(),
                    MenuOutcome::RunShell(command) => {
                        match self.run_shell(&command, &link, &mut signals).await? {
                            ShellEnd::Finished => {}
                            ShellEnd::Quit => return self.finish(),
                            ShellEnd::TargetLost => match self.recover(link, &mut signals).await? {
                                Some(reopened) => link = reopened,
                                None => return self.finish(),
                            },
                        }
                    }
                    MenuOutcome::Resume | MenuOutcome::AbortShell => {}
                },
                Event::Console(Err(e)) => {
                    return Err(RelayError::Console(format!("failed to read console: {}", e)));
                }
                Event::Target(Ok(0)) => {
                    debug!("target closed the connection");
                    lost = true;
                }
                Event::Target(Err(e)) | Event::Sent(Err(e)) => {
                    debug!("target I/O failed: {}", e);
                    lost = true;
                }
                Event::Target(Ok(n)) => self.show(&received[..n])?,
                Event::Sent(Ok(_)) => {}
                Event::Signal(SignalEvent::Resize) => self.resize(),
                Event::Signal(SignalEvent::Terminate) => {
                    info!("terminated by signal");
                    return self.finish();
                }
            }

            if lost {
                match self.recover(link, &mut signals).await? {
                    Some(reopened) => link = reopened,
                    None => return self.finish(),
                }
            }
        }
    }

    /// Open (or reopen) the target in cooked mode, then go raw. `None` means
    /// a signal arrived while waiting.
    async fn connect(
        &mut self,
        old: Option<Link>,
        signals: &mut RelaySignals,
    ) -> RelayResult<Option<Link>> {
        let display = &mut self.display;
        let connections = &mut self.connections;
        let opening = async move {
            match old {
                Some(old) => connections.reopen(old, |line| display.notice(line)).await,
                None => connections.open(|line| display.notice(line)).await,
            }
        };
        let opened = tokio::select! {
            r = opening => r?,
            _ = signals.terminated() => return Ok(None),
        };
        debug!(kind = ?opened.kind(), "link to {} ready", opened.name());

        self.on_connected();
        self.display.set_mode(TerminalMode::Raw, &mut self.switch)?;
        Ok(Some(opened))
    }

    /// Handle a dead link: give up, or reconnect when enabled.
    async fn recover(
        &mut self,
        link: Link,
        signals: &mut RelaySignals,
    ) -> RelayResult<Option<Link>> {
        self.display.set_mode(TerminalMode::Cooked, &mut self.switch)?;
        warn!("lost connection to {}", self.connections.name());

        if !self.connections.reconnect() {
            return Err(RelayError::ConnectionLost(self.connections.name().to_string()));
        }
        self.display
            .notice(&format!("ttyrelay lost connection to {}", self.connections.name()))?;
        self.connect(Some(link), signals).await
    }

    fn on_connected(&mut self) {
        self.outbound.clear();
        if let Some(telnet) = self.telnet.as_mut() {
            telnet.reset();
        }
        self.resize();
    }

    pub(super) fn finish(&mut self) -> RelayResult<()> {
        self.display.set_mode(TerminalMode::Cooked, &mut self.switch)?;
        Ok(())
    }

    pub(super) fn resize(&mut self) {
        if !self.naws {
            return;
        }
        if let (Some(telnet), Some((cols, rows))) = (self.telnet.as_mut(), window_size()) {
            telnet.notify_resize(u32::from(cols), u32::from(rows), &mut self.outbound);
        }
    }

    /// Queue bytes for the target.
    pub(super) fn send(&mut self, bytes: &[u8]) {
        encode_outbound(self.telnet.as_ref(), bytes, &mut self.outbound);
    }

    /// Render target bytes, letting telnet swallow negotiation.
    fn show(&mut self, bytes: &[u8]) -> RelayResult<()> {
        for &byte in bytes {
            match self.telnet.as_mut() {
                Some(telnet) => {
                    if let Inbound::Deliver(byte) = telnet.feed_inbound(byte, &mut self.outbound) {
                        self.display.render(byte)?;
                    }
                }
                None => self.display.render(byte)?,
            }
        }
        self.display.flush()?;
        Ok(())
    }

    /// Map console keystrokes to the target, or to `shell_input` while a
    /// shell command runs. Bytes typed after the escape key start the menu
    /// line.
    pub(super) async fn handle_keys(
        &mut self,
        bytes: &[u8],
        mut shell_input: Option<&mut ByteQueue>,
    ) -> RelayResult<MenuOutcome> {
        for (i, &byte) in bytes.iter().enumerate() {
            match self.keys.map(byte) {
                KeyAction::Command => {
                    return self.menu(&bytes[i + 1..], shell_input.is_some()).await;
                }
                KeyAction::Dropped => {}
                action => match shell_input.as_mut() {
                    Some(queue) => queue.append(action.bytes()),
                    None => self.send(key_bytes(&action, self.telnet.as_ref())),
                },
            }
        }
        Ok(MenuOutcome::Resume)
    }

    async fn menu(&mut self, typed: &[u8], shell_running: bool) -> RelayResult<MenuOutcome> {
        self.display.set_mode(TerminalMode::Warm, &mut self.switch)?;
        let prompt = format!("ttyrelay {}> ", self.connections.name());
        self.display.writer().write_all(prompt.as_bytes())?;
        self.display.flush()?;

        let line = read_line(&self.console, typed, self.menu_timeout).await?;
        let outcome = match line {
            Some(line) => self.dispatch(MenuCommand::parse(&line, shell_running), shell_running)?,
            None => {
                self.display.notice("")?;
                MenuOutcome::Resume
            }
        };

        self.display.set_mode(TerminalMode::Raw, &mut self.switch)?;
        Ok(outcome)
    }

    fn dispatch(&mut self, command: MenuCommand, shell_running: bool) -> RelayResult<MenuOutcome> {
        debug!(?command, "menu command");
        let reply = match command {
            MenuCommand::ToggleBackspace => {
                format!("Backspace key sends {}", self.keys.toggle_backspace())
            }
            MenuCommand::CycleEnter => format!("Enter key sends {}", self.keys.cycle_enter()),
            MenuCommand::ForwardEscape => {
                self.send(&[ESCAPE_KEY]);
                "Sent CTRL-\\ to target".to_string()
            }
            MenuCommand::Quit => return Ok(MenuOutcome::Quit),
            MenuCommand::ToggleReconnect => {
                let reconnect = !self.connections.reconnect();
                self.connections.set_reconnect(reconnect);
                format!("Reconnect is {}", on_off(reconnect))
            }
            MenuCommand::CycleTimestamps => {
                let timestamps = self.display.timestamps().next();
                self.display.set_timestamps(timestamps);
                format!("Timestamps are {}", timestamps)
            }
            MenuCommand::CycleHex => {
                let hex = self.display.hex().next();
                self.display.set_hex(hex);
                format!("Hex output is {}", hex)
            }
            MenuCommand::AbortShell => return Ok(MenuOutcome::AbortShell),
            MenuCommand::Shell(command) if command.is_empty() => {
                "Must provide a shell command".to_string()
            }
            MenuCommand::Shell(_) if shell_running => {
                "A shell command is already running".to_string()
            }
            MenuCommand::Shell(command) => return Ok(MenuOutcome::RunShell(command)),
            MenuCommand::Help => help_text(&self.menu_status(shell_running)),
            MenuCommand::Resume => return Ok(MenuOutcome::Resume),
            MenuCommand::Invalid(line) => format!(
                "{}\n{}",
                invalid_text(&line),
                help_text(&self.menu_status(shell_running))
            ),
        };
        self.display.notice(&reply)?;
        Ok(MenuOutcome::Resume)
    }

    fn menu_status(&self, shell_running: bool) -> MenuStatus {
        MenuStatus {
            backspace: self.keys.backspace(),
            enter: self.keys.enter(),
            reconnect: self.connections.reconnect(),
            timestamps: self.display.timestamps(),
            hex: self.display.hex(),
            shell_running,
        }
    }
}

/// Bytes a mapped key sends to the target. ASCII telnet already follows
/// every CR with NUL, so an Enter sequence ending in CR NUL loses its own.
fn key_bytes<'a>(action: &'a KeyAction, telnet: Option<&TelnetEngine>) -> &'a [u8] {
    let bytes = action.bytes();
    match telnet {
        Some(engine) if !engine.is_binary() && bytes.ends_with(b"\r\0") => &bytes[..bytes.len() - 1],
        _ => bytes,
    }
}

/// One line from the console, starting with `typed`. `None` if nothing
/// complete arrives within `limit`; end of input ends the line.
async fn read_line(
    console: &AsyncFile,
    typed: &[u8],
    limit: Duration,
) -> RelayResult<Option<Vec<u8>>> {
    let mut line = typed.to_vec();
    let result = timeout(limit, fill_line(console, &mut line)).await;
    match result {
        Ok(Ok(())) => Ok(Some(line)),
        Ok(Err(e)) => Err(RelayError::Console(format!("failed to read command: {}", e))),
        Err(_elapsed) => Ok(None),
    }
}

async fn fill_line(console: &AsyncFile, line: &mut Vec<u8>) -> io::Result<()> {
    let mut buf = [0u8; READ_CHUNK];
    loop {
        if let Some(end) = line.iter().position(|&b| b == b'\n') {
            line.truncate(end);
            return Ok(());
        }
        let n = console.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        line.extend_from_slice(&buf[..n]);
    }
}
