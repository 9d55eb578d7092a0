//! Bounded FIFO byte buffer used for per-session read/write buffering.
//!
//! `IOBuffer` backs every session's read and write direction in the engine.
//! It never blocks and never enforces its capacity by itself: callers check
//! [`IOBuffer::space`] before calling [`IOBuffer::add`], since `add` still
//! appends past capacity and only logs a warning (a soft overflow, not an
//! error — the caller is expected to have checked first).

use tracing::warn;

/// A contiguous FIFO byte buffer with a configured capacity.
#[derive(Debug, Clone)]
pub struct IOBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl IOBuffer {
    /// Creates an empty buffer bounded at `capacity` bytes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::new(),
            capacity,
        }
    }

    /// Number of bytes currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Remaining capacity before this buffer is considered full.
    #[must_use]
    pub fn space(&self) -> usize {
        self.capacity.saturating_sub(self.data.len())
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends `data` to the back of the buffer.
    ///
    /// Does not enforce `capacity`; exceeding it is a soft warning. Callers
    /// that need to respect back-pressure must check [`IOBuffer::space`]
    /// first, per the engine's back-pressure design.
    pub fn add(&mut self, data: &[u8]) {
        if data.len() > self.space() {
            warn!(
                over_by = data.len().saturating_sub(self.space()),
                capacity = self.capacity,
                queued = self.data.len(),
                "IOBuffer capacity exceeded"
            );
        }
        self.data.extend_from_slice(data);
    }

    /// Removes and returns up to `n` bytes from the front of the buffer.
    pub fn get(&mut self, n: usize) -> Vec<u8> {
        let take = n.min(self.data.len());
        self.data.drain(..take).collect()
    }

    /// Borrows the buffered bytes without consuming them.
    #[must_use]
    pub fn peek(&self) -> &[u8] {
        &self.data
    }

    /// Pushes `data` back onto the front of the buffer ("unget"), used when a
    /// decoder consumed bytes for a frame it could not yet fully parse.
    pub fn push_front(&mut self, data: &[u8]) {
        self.data.splice(0..0, data.iter().copied());
    }
}
