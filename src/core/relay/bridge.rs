//! Running a shell command with its stdin and stdout wired to the target.

use std::io::{self, Write};

use tracing::{debug, info, warn};

use super::event_loop::{MenuOutcome, Relay, RelaySignals, SignalEvent};
use crate::core::display::ModeSwitch;
use crate::core::queue::{ByteQueue, READ_CHUNK};
use crate::core::telnet::Inbound;
use crate::domain::error::{RelayError, RelayResult};
use crate::infrastructure::connection::{Connector, Link};
use crate::infrastructure::console::window_size;
use crate::infrastructure::nonblocking::AsyncFile;
use crate::infrastructure::process::{ShellPipes, ShellProcess};

/// Queued bytes above which the side feeding a queue stops being read.
pub const WATERMARK: usize = 4096;

/// How a shell session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShellEnd {
    Finished,
    Quit,
    TargetLost,
}

enum BridgeEvent {
    Console(io::Result<usize>),
    Target(io::Result<usize>),
    ToTarget(io::Result<usize>),
    Stdout(io::Result<usize>),
    ToShell(io::Result<usize>),
    Stderr(io::Result<usize>),
    Signal(SignalEvent),
}

struct ShellSession {
    pipes: ShellPipes,
    to_shell: ByteQueue,
    stderr_open: bool,
    /// Target bytes delivered to the command
    received: u64,
    /// Command output sent to the target
    sent: u64,
}

impl<W: Write, S: ModeSwitch, C: Connector> Relay<W, S, C> {
    /// Run `command` until it finishes, is aborted, or the target goes away.
    pub(crate) async fn run_shell(
        &mut self,
        command: &str,
        link: &Link,
        signals: &mut RelaySignals,
    ) -> RelayResult<ShellEnd> {
        let (mut process, pipes) = match ShellProcess::spawn(command, link.name(), window_size()) {
            Ok(started) => started,
            Err(e) => {
                warn!("shell command failed to start: {}", e);
                self.display.notice(&e.to_string())?;
                return Ok(ShellEnd::Finished);
            }
        };
        self.display.notice(&format!("Running '{}'...", command))?;

        let mut session = ShellSession {
            pipes,
            to_shell: ByteQueue::new(),
            stderr_open: true,
            received: 0,
            sent: 0,
        };
        let end = self.bridge(&mut session, link, signals).await;

        let ShellSession {
            pipes,
            mut to_shell,
            received,
            mut sent,
            ..
        } = session;
        close_input(pipes.stdin, &mut to_shell);
        sent += self.forward_pending(&pipes.stdout);
        let termination = process.terminate(&self.policy).await;
        sent += self.forward_pending(&pipes.stdout);
        self.show_pending(&pipes.stderr)?;

        info!(received, sent, %termination, "shell command '{}' finished", process.command());
        self.display.notice(&format!(
            "Command received {} and sent {} bytes, {}",
            received, sent, termination
        ))?;
        end
    }

    async fn bridge(
        &mut self,
        session: &mut ShellSession,
        link: &Link,
        signals: &mut RelaySignals,
    ) -> RelayResult<ShellEnd> {
        let mut input = [0u8; READ_CHUNK];
        let mut from_target = [0u8; READ_CHUNK];
        let mut from_stdout = [0u8; READ_CHUNK];
        let mut from_stderr = [0u8; READ_CHUNK];

        loop {
            let event = tokio::select! {
                r = self.console.read(&mut input) => BridgeEvent::Console(r),
                r = link.io().read(&mut from_target), if session.to_shell.len() < WATERMARK => {
                    BridgeEvent::Target(r)
                }
                r = link.io().drain(&mut self.outbound), if !self.outbound.is_empty() => {
                    BridgeEvent::ToTarget(r)
                }
                r = session.pipes.stdout.read(&mut from_stdout), if self.outbound.len() < WATERMARK => {
                    BridgeEvent::Stdout(r)
                }
                r = session.pipes.stdin.drain(&mut session.to_shell), if !session.to_shell.is_empty() => {
                    BridgeEvent::ToShell(r)
                }
                r = session.pipes.stderr.read(&mut from_stderr), if session.stderr_open => {
                    BridgeEvent::Stderr(r)
                }
                sig = signals.recv() => BridgeEvent::Signal(sig),
            };

            match event {
                BridgeEvent::Console(Ok(0)) => {
                    return Err(RelayError::Console("console input closed".to_string()));
                }
                BridgeEvent::Console(Ok(n)) => {
                    match self.handle_keys(&input[..n], Some(&mut session.to_shell)).await? {
                        MenuOutcome::Quit => return Ok(ShellEnd::Quit),
                        MenuOutcome::AbortShell => return Ok(ShellEnd::Finished),
                        MenuOutcome::Resume | MenuOutcome::RunShell(_) => {}
                    }
                }
                BridgeEvent::Console(Err(e)) => {
                    return Err(RelayError::Console(format!("failed to read console: {}", e)));
                }
                BridgeEvent::Target(Ok(0)) => return Ok(ShellEnd::TargetLost),
                BridgeEvent::Target(Ok(n)) => {
                    for &byte in &from_target[..n] {
                        let delivered = match self.telnet.as_mut() {
                            Some(telnet) => match telnet.feed_inbound(byte, &mut self.outbound) {
                                Inbound::Deliver(byte) => Some(byte),
                                Inbound::Consumed => None,
                            },
                            None => Some(byte),
                        };
                        if let Some(byte) = delivered {
                            session.to_shell.append(&[byte]);
                            session.received += 1;
                        }
                    }
                }
                BridgeEvent::Target(Err(e)) | BridgeEvent::ToTarget(Err(e)) => {
                    debug!("target I/O failed during shell command: {}", e);
                    return Ok(ShellEnd::TargetLost);
                }
                BridgeEvent::ToTarget(Ok(_)) | BridgeEvent::ToShell(Ok(_)) => {}
                BridgeEvent::Stdout(Ok(0)) => {
                    debug!("shell command closed its output");
                    return Ok(ShellEnd::Finished);
                }
                BridgeEvent::Stdout(Ok(n)) => {
                    session.sent += n as u64;
                    self.send(&from_stdout[..n]);
                }
                BridgeEvent::Stdout(Err(e)) => {
                    warn!("failed to read shell command output: {}", e);
                    return Ok(ShellEnd::Finished);
                }
                BridgeEvent::ToShell(Err(e)) => {
                    debug!("shell command stopped reading its input: {}", e);
                    return Ok(ShellEnd::Finished);
                }
                BridgeEvent::Stderr(Ok(n)) if n > 0 => {
                    self.display.render_shell(&from_stderr[..n])?;
                    self.display.flush()?;
                }
                // The pty master reports EIO once the command has exited.
                BridgeEvent::Stderr(_) => session.stderr_open = false,
                BridgeEvent::Signal(SignalEvent::Resize) => self.resize(),
                BridgeEvent::Signal(SignalEvent::Terminate) => return Ok(ShellEnd::Quit),
            }
        }
    }

    /// Queue output the command already wrote, up to one watermark.
    fn forward_pending(&mut self, stdout: &AsyncFile) -> u64 {
        let mut buf = [0u8; READ_CHUNK];
        let mut forwarded = 0;
        while forwarded < WATERMARK {
            match stdout.try_read(&mut buf) {
                Ok(Some(n)) if n > 0 => {
                    self.send(&buf[..n]);
                    forwarded += n;
                }
                _ => break,
            }
        }
        forwarded as u64
    }

    fn show_pending(&mut self, stderr: &AsyncFile) -> RelayResult<()> {
        let mut buf = [0u8; READ_CHUNK];
        let mut shown = 0;
        while shown < WATERMARK {
            match stderr.try_read(&mut buf) {
                Ok(Some(n)) if n > 0 => {
                    self.display.render_shell(&buf[..n])?;
                    shown += n;
                }
                _ => break,
            }
        }
        self.display.flush()?;
        Ok(())
    }
}

/// Hand the command one more write of its queued input, then close its stdin.
fn close_input(stdin: AsyncFile, queue: &mut ByteQueue) -> usize {
    if queue.is_empty() {
        return 0;
    }
    match stdin.try_drain(queue) {
        Ok(Some(n)) => n,
        Ok(None) => 0,
        Err(e) => {
            debug!("shell command input closed early: {}", e);
            0
        }
    }
}
