//! Shell commands run with their standard streams bridged to the target.

use std::fmt;
use std::os::fd::{AsFd, OwnedFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::pty::{openpty, Winsize};
use nix::sys::signal::{killpg, Signal};
use nix::sys::termios::Termios;
use nix::unistd::{pipe2, Pid};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::nonblocking::AsyncFile;
use crate::domain::error::{RelayError, RelayResult};

/// Environment variable carrying the target name into the command.
pub const TARGET_ENV: &str = "TTYRELAY_TARGET";

/// How a shell command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    Signaled(i32),
    /// Still running after every escalation step
    TimedOut,
}

impl From<ExitStatus> for Termination {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => Termination::Exited(code),
            (None, Some(signal)) => Termination::Signaled(signal),
            (None, None) => Termination::Exited(-1),
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Exited(code) => write!(f, "exit status {}", code),
            Termination::Signaled(signal) => match Signal::try_from(*signal) {
                Ok(name) => write!(f, "killed by {}", name),
                Err(_) => write!(f, "killed by signal {}", signal),
            },
            Termination::TimedOut => write!(f, "did not exit"),
        }
    }
}

/// Signals sent to a command's process group, in order, until it exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationPolicy {
    /// Wait before the first signal
    pub grace: Duration,
    pub steps: Vec<(Signal, Duration)>,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        let step = Duration::from_millis(250);
        Self {
            grace: step,
            steps: vec![
                (Signal::SIGTERM, step),
                (Signal::SIGHUP, step),
                (Signal::SIGINT, step),
                (Signal::SIGKILL, Duration::from_secs(1)),
            ],
        }
    }
}

/// Our ends of the command's standard streams.
#[derive(Debug)]
pub struct ShellPipes {
    /// Write end of the command's stdin
    pub stdin: AsyncFile,
    /// Read end of the command's stdout
    pub stdout: AsyncFile,
    /// Master side of the pseudo-terminal holding the command's stderr
    pub stderr: AsyncFile,
}

/// A running `sh -c` command in its own process group.
#[derive(Debug)]
pub struct ShellProcess {
    child: Child,
    pgid: Pid,
    command: String,
}

impl ShellProcess {
    /// Start `command` with stdin and stdout on pipes and stderr on a fresh
    /// pseudo-terminal sized like the console.
    pub fn spawn(
        command: &str,
        target_name: &str,
        window: Option<(u16, u16)>,
    ) -> RelayResult<(Self, ShellPipes)> {
        let (stdin_read, stdin_write) = pipe2(OFlag::O_CLOEXEC)?;
        let (stdout_read, stdout_write) = pipe2(OFlag::O_CLOEXEC)?;

        let winsize = window.map(|(cols, rows)| Winsize {
            ws_row: rows,
            ws_col: cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        });
        let pty = openpty(winsize.as_ref(), None::<&Termios>)?;
        set_cloexec(&pty.master)?;
        set_cloexec(&pty.slave)?;

        let child = spawn_child(command, target_name, stdin_read, stdout_write, pty.slave)?;
        let pid = child
            .id()
            .ok_or_else(|| RelayError::Subprocess("command exited before it was tracked".to_string()))?;
        info!(pid, "started shell command '{}'", command);

        let pipes = ShellPipes {
            stdin: AsyncFile::new(stdin_write)?,
            stdout: AsyncFile::new(stdout_read)?,
            stderr: AsyncFile::new(pty.master)?,
        };
        let process = Self {
            child,
            pgid: Pid::from_raw(pid as i32),
            command: command.to_string(),
        };
        Ok((process, pipes))
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Reap the command, signalling its process group per `policy` if it
    /// does not exit on its own.
    pub async fn terminate(&mut self, policy: &EscalationPolicy) -> Termination {
        if let Some(termination) = self.wait_for(policy.grace).await {
            return termination;
        }

        for &(signal, wait) in &policy.steps {
            debug!(pgid = self.pgid.as_raw(), ?signal, "escalating shell command shutdown");
            match killpg(self.pgid, signal) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => warn!("failed to send {} to shell command: {}", signal, e),
            }
            if let Some(termination) = self.wait_for(wait).await {
                return termination;
            }
        }

        warn!("shell command '{}' survived every signal", self.command);
        Termination::TimedOut
    }

    async fn wait_for(&mut self, limit: Duration) -> Option<Termination> {
        match timeout(limit, self.child.wait()).await {
            Ok(Ok(status)) => Some(status.into()),
            Ok(Err(e)) => {
                warn!("failed to wait for shell command: {}", e);
                Some(Termination::TimedOut)
            }
            Err(_elapsed) => None,
        }
    }
}

fn spawn_child(
    command: &str,
    target_name: &str,
    stdin: OwnedFd,
    stdout: OwnedFd,
    stderr: OwnedFd,
) -> RelayResult<Child> {
    // The Command keeps its copies of the child's ends until dropped here, so
    // our side sees EOF once the child closes them.
    let mut shell = std::process::Command::new("sh");
    shell
        .arg("-c")
        .arg(command)
        .stdin(Stdio::from(stdin))
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .env(TARGET_ENV, target_name)
        .process_group(0);

    Command::from(shell)
        .spawn()
        .map_err(|e| RelayError::Subprocess(format!("could not start '{}': {}", command, e)))
}

fn set_cloexec<Fd: AsFd>(fd: &Fd) -> nix::Result<()> {
    fcntl(fd.as_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    Ok(())
}
