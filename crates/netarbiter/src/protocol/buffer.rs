//! Reassembly buffer for partially received frames.
//!
//! Bytes read from a socket are appended to a [`FrameBuffer`], which hands out
//! complete frames as soon as they are buffered and retains any trailing
//! partial frame for the next read.
//!
//! Growth policy: the buffer starts at [`DEFAULT_READ_CAPACITY`] bytes. When a
//! frame header declares a frame longer than the spare capacity, the buffer
//! reserves exactly the bytes that frame still needs, so a single large frame
//! costs one reallocation. Plain appends fall back to `Vec`'s amortised
//! doubling. Once every buffered byte has been consumed and the buffer had
//! grown beyond [`SHRINK_THRESHOLD`], it is shrunk back to the default size so
//! an occasional large transfer does not pin memory for the connection's
//! lifetime.

use super::errors::FramingError;
use super::frame::{FrameEvent, declared_length, peek_frame};

/// Initial capacity of every reassembly buffer.
pub const DEFAULT_READ_CAPACITY: usize = 256;

/// Capacity above which an empty buffer is returned to the default size.
pub const SHRINK_THRESHOLD: usize = 16 * 1024;

/// Growable buffer that reassembles frames from arbitrary read boundaries.
#[derive(Debug)]
pub struct FrameBuffer {
    bytes: Vec<u8>,
    start: usize,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuffer {
    /// Creates an empty buffer with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bytes: Vec::with_capacity(DEFAULT_READ_CAPACITY),
            start: 0,
        }
    }

    /// Number of buffered bytes not yet consumed.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.bytes.len() - self.start
    }

    /// Current allocation of the underlying storage.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.bytes.capacity()
    }

    /// Appends freshly read bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.reserve_for_pending_frame(data.len());
        self.bytes.extend_from_slice(data);
    }

    /// Removes and returns the next complete frame or heartbeat.
    ///
    /// Returns `Ok(None)` when the buffered bytes end inside a frame. A
    /// [`FramingError`] means the stream is desynchronised; the buffer is left
    /// untouched and the connection should be dropped.
    pub fn next_frame(&mut self) -> Result<Option<FrameEvent>, FramingError> {
        let pending = self.bytes.get(self.start..).unwrap_or_default();
        let Some((event, consumed)) = peek_frame(pending)? else {
            self.compact();
            return Ok(None);
        };
        self.start += consumed;
        if self.start == self.bytes.len() {
            self.reset();
        }
        Ok(Some(event))
    }

    fn reserve_for_pending_frame(&mut self, incoming: usize) {
        self.compact();
        let declared = declared_length(&self.bytes).unwrap_or_default();
        let needed = declared.max(self.bytes.len() + incoming);
        if needed > self.bytes.capacity() {
            self.bytes.reserve_exact(needed - self.bytes.len());
        }
    }

    fn compact(&mut self) {
        if self.start > 0 {
            self.bytes.drain(..self.start);
            self.start = 0;
        }
    }

    fn reset(&mut self) {
        self.bytes.clear();
        self.start = 0;
        if self.bytes.capacity() > SHRINK_THRESHOLD {
            self.bytes.shrink_to(DEFAULT_READ_CAPACITY);
        }
    }
}
