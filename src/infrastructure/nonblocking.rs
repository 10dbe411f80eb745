//! Readiness-driven I/O on raw descriptors.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use tokio::io::unix::AsyncFd;

use crate::core::queue::{ByteQueue, READ_CHUNK};

/// Set `O_NONBLOCK` on a descriptor, returning the previous flags.
pub fn set_nonblocking<Fd: AsFd>(fd: &Fd) -> io::Result<OFlag> {
    let flags = OFlag::from_bits_truncate(fcntl(fd.as_fd(), FcntlArg::F_GETFL)?);
    fcntl(fd.as_fd(), FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(flags)
}

/// Non-blocking descriptor registered with the runtime.
///
/// Every operation makes at most one read or write once the descriptor
/// reports ready.
#[derive(Debug)]
pub struct AsyncFile {
    inner: AsyncFd<File>,
}

impl AsyncFile {
    pub fn new(fd: OwnedFd) -> io::Result<Self> {
        set_nonblocking(&fd)?;
        Ok(Self {
            inner: AsyncFd::new(File::from(fd))?,
        })
    }

    /// Read whatever is available, `Ok(0)` at end of file.
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.inner.readable().await?;
            match guard.try_io(|inner| {
                let mut file = inner.get_ref();
                file.read(buf)
            }) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    /// Read one chunk into an owned buffer.
    pub async fn read_chunk(&self) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; READ_CHUNK];
        let n = self.read(&mut buf).await?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Write the head of `queue` once, leaving anything unwritten queued.
    pub async fn drain(&self, queue: &mut ByteQueue) -> io::Result<usize> {
        loop {
            let mut guard = self.inner.writable().await?;
            match guard.try_io(|inner| {
                let mut file = inner.get_ref();
                queue.drain_to(&mut file)
            }) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    /// Non-blocking read that never waits; `Ok(None)` when nothing is pending.
    pub fn try_read(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        let mut file = self.inner.get_ref();
        match file.read(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write the head of `queue` once without waiting; `Ok(None)` when the
    /// descriptor is full.
    pub fn try_drain(&self, queue: &mut ByteQueue) -> io::Result<Option<usize>> {
        let mut file = self.inner.get_ref();
        match queue.drain_to(&mut file) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn get_ref(&self) -> &File {
        self.inner.get_ref()
    }

    /// Write all of `bytes`, waiting for readiness as needed.
    pub async fn write_all(&self, mut bytes: &[u8]) -> io::Result<()> {
        while !bytes.is_empty() {
            let mut guard = self.inner.writable().await?;
            match guard.try_io(|inner| {
                let mut file = inner.get_ref();
                file.write(bytes)
            }) {
                Ok(Ok(0)) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(Ok(n)) => bytes = &bytes[n..],
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
        Ok(())
    }
}

impl AsRawFd for AsyncFile {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}
