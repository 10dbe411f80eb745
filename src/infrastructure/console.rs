//! The controlling terminal: line discipline, input and output.

use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::sync::{Mutex, Once};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::termios::{tcgetattr, tcsetattr, InputFlags, LocalFlags, SetArg, Termios};
use tracing::{debug, warn};

use super::nonblocking::AsyncFile;
use crate::core::display::{ModeSwitch, TerminalMode};
use crate::domain::error::{RelayError, RelayResult};

/// Settings and file flags to put back if we panic while the terminal is raw.
static SAVED_CONSOLE: Mutex<Option<(Termios, OFlag)>> = Mutex::new(None);
static PANIC_HOOK: Once = Once::new();

/// Owns the console's original termios and file status flags and puts them
/// back when dropped.
pub struct TerminalGuard {
    original: Termios,
    original_flags: OFlag,
}

impl TerminalGuard {
    pub fn acquire() -> RelayResult<Self> {
        let stdin = io::stdin();
        let original = tcgetattr(stdin.as_fd())
            .map_err(|e| RelayError::Console(format!("stdin is not a terminal: {}", e)))?;
        let original_flags = OFlag::from_bits_truncate(fcntl(stdin.as_fd(), FcntlArg::F_GETFL)?);

        if let Ok(mut saved) = SAVED_CONSOLE.lock() {
            *saved = Some((original.clone(), original_flags));
        }
        install_panic_hook();

        debug!("console settings saved");
        Ok(Self {
            original,
            original_flags,
        })
    }

    fn settings_for(&self, mode: TerminalMode) -> Termios {
        let mut termios = self.original.clone();
        match mode {
            TerminalMode::Raw => {
                termios.input_flags &= !(InputFlags::IGNBRK | InputFlags::BRKINT | InputFlags::PARMRK);
                termios.local_flags = LocalFlags::empty();
            }
            TerminalMode::Warm => termios.local_flags &= !LocalFlags::ISIG,
            TerminalMode::Cooked => {}
        }
        termios
    }
}

impl ModeSwitch for TerminalGuard {
    fn apply(&mut self, mode: TerminalMode) -> io::Result<()> {
        let termios = self.settings_for(mode);
        tcsetattr(io::stdin().as_fd(), SetArg::TCSANOW, &termios)?;
        Ok(())
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if let Err(e) = restore_console(io::stdin().as_fd(), &self.original, self.original_flags) {
            warn!("failed to restore console: {}", e);
        }
        if let Ok(mut saved) = SAVED_CONSOLE.lock() {
            saved.take();
        }
    }
}

fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if let Ok(saved) = SAVED_CONSOLE.lock() {
                if let Some((termios, flags)) = saved.as_ref() {
                    let _ = restore_console(io::stdin().as_fd(), termios, *flags);
                }
            }
            previous(info);
        }));
    });
}

/// Put back termios and file status flags. The flags are restored even when
/// the termios call fails.
fn restore_console(fd: BorrowedFd<'_>, termios: &Termios, flags: OFlag) -> io::Result<()> {
    let settings = tcsetattr(fd, SetArg::TCSANOW, termios);
    fcntl(fd, FcntlArg::F_SETFL(flags))?;
    settings?;
    Ok(())
}

/// Keystrokes from the console, as a non-blocking duplicate of stdin.
///
/// Stdin and stdout usually share one open file description, so this also
/// makes console output non-blocking; see [`ConsoleWriter`].
pub fn console_input() -> io::Result<AsyncFile> {
    let fd: OwnedFd = io::stdin().as_fd().try_clone_to_owned()?;
    AsyncFile::new(fd)
}

/// Console output that waits out `EAGAIN` instead of losing bytes.
#[derive(Debug)]
pub struct ConsoleWriter {
    file: File,
}

impl ConsoleWriter {
    pub fn stdout() -> io::Result<Self> {
        let fd = io::stdout().as_fd().try_clone_to_owned()?;
        Ok(Self {
            file: File::from(fd),
        })
    }

    fn wait_writable(&self) -> io::Result<()> {
        let mut fds = [PollFd::new(self.file.as_fd(), PollFlags::POLLOUT)];
        match poll(&mut fds, PollTimeout::NONE) {
            Ok(_) | Err(nix::errno::Errno::EINTR) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Write for ConsoleWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            match self.file.write(buf) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => self.wait_writable()?,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                result => return result,
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Current console size as (columns, rows).
pub fn window_size() -> Option<(u16, u16)> {
    match crossterm::terminal::size() {
        Ok(size) => Some(size),
        Err(e) => {
            debug!("console size unavailable: {}", e);
            None
        }
    }
}
