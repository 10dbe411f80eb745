//! Growable FIFO byte queue used for every buffered direction of the relay.
//!
//! Storage is a ring: the live bytes start at `head` and run for `count`
//! bytes, wrapping at the end of the buffer. Callers only see `append`,
//! `peek`, `consume` and `clear`; index arithmetic stays in here.

use std::io::{self, Read, Write};

/// First allocation made by an empty queue.
const INITIAL_CAPACITY: usize = 1024;

/// Largest chunk read by [`ByteQueue::fill_from`].
pub const READ_CHUNK: usize = 256;

#[derive(Debug, Default)]
pub struct ByteQueue {
    buffer: Vec<u8>,
    head: usize,
    count: usize,
}

impl ByteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued bytes.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Add bytes at the tail, doubling the buffer until they fit.
    pub fn append(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let needed = self.count + bytes.len();
        if needed > self.buffer.len() {
            self.grow(needed);
        }

        let capacity = self.buffer.len();
        let tail = (self.head + self.count) % capacity;
        let first = bytes.len().min(capacity - tail);
        self.buffer[tail..tail + first].copy_from_slice(&bytes[..first]);
        self.buffer[..bytes.len() - first].copy_from_slice(&bytes[first..]);
        self.count = needed;
    }

    /// Longest contiguous run of queued bytes starting at the head.
    ///
    /// Empty when the queue is empty. Follow with [`consume`](Self::consume)
    /// for however much of the run was used.
    pub fn peek(&self) -> &[u8] {
        if self.count == 0 {
            return &[];
        }
        let end = (self.head + self.count).min(self.buffer.len());
        &self.buffer[self.head..end]
    }

    /// Remove `n` bytes from the head. Removing at least `len()` empties the queue.
    pub fn consume(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        if n >= self.count {
            self.clear();
            return;
        }
        self.count -= n;
        self.head = (self.head + n) % self.buffer.len();
    }

    /// Drop everything queued. The allocation is kept.
    pub fn clear(&mut self) {
        self.head = 0;
        self.count = 0;
    }

    /// Make exactly one write of the contiguous head run and consume what the
    /// writer accepted. A short write leaves the rest queued, in order.
    ///
    /// Returns `Ok(0)` without writing when the queue is empty.
    pub fn drain_to<W: Write + ?Sized>(&mut self, writer: &mut W) -> io::Result<usize> {
        let run = self.peek();
        if run.is_empty() {
            return Ok(0);
        }
        let written = writer.write(run)?;
        self.consume(written);
        Ok(written)
    }

    /// Make exactly one read of up to [`READ_CHUNK`] bytes and append them.
    /// Returns the number read, `Ok(0)` meaning end of file.
    pub fn fill_from<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<usize> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = reader.read(&mut chunk)?;
        self.append(&chunk[..n]);
        Ok(n)
    }

    fn grow(&mut self, needed: usize) {
        let mut capacity = self.buffer.len().max(INITIAL_CAPACITY);
        while capacity < needed {
            capacity *= 2;
        }

        // Linearize into the new buffer so head restarts at zero. Allocation
        // failure aborts the process.
        let mut grown = vec![0u8; capacity];
        let old = self.buffer.len();
        for (i, slot) in grown.iter_mut().take(self.count).enumerate() {
            *slot = self.buffer[(self.head + i) % old];
        }
        self.buffer = grown;
        self.head = 0;
    }
}
