//! Per-connection session state, shared by both server and client engines.
//!
//! Subscriber lists are keyed by stable integers, not borrowed references,
//! so that session teardown requires only a one-pass sweep; [`SessionId`]
//! is that integer, generated by a monotonic counter owned by each engine.

use std::io;

use tokio::io::Interest;
use tokio::net::TcpStream;

use iobuf::IOBuffer;

use crate::constants::{READ_LOW_WATER, SESSION_BUFFER_CAPACITY};

pub type SessionId = u64;

/// A single TCP connection: non-blocking socket plus bounded read/write
/// buffers. The client additionally stashes the source name this socket
/// belongs to.
pub struct Session {
    pub id: SessionId,
    pub socket: TcpStream,
    pub read_buf: IOBuffer,
    pub write_buf: IOBuffer,
    pub source: Option<String>,
}

impl Session {
    #[must_use]
    pub fn new(id: SessionId, socket: TcpStream) -> Self {
        Self::with_capacity(id, socket, SESSION_BUFFER_CAPACITY)
    }

    /// Like [`Session::new`], but with an explicit buffer capacity instead
    /// of the production default; lets tests induce back-pressure without
    /// waiting for [`SESSION_BUFFER_CAPACITY`] (4 MiB) to fill.
    #[must_use]
    pub fn with_capacity(id: SessionId, socket: TcpStream, capacity: usize) -> Self {
        Self {
            id,
            socket,
            read_buf: IOBuffer::new(capacity),
            write_buf: IOBuffer::new(capacity),
            source: None,
        }
    }

    #[must_use]
    pub fn for_source(id: SessionId, socket: TcpStream, source: impl Into<String>) -> Self {
        let mut session = Self::new(id, socket);
        session.source = Some(source.into());
        session
    }

    /// The readiness interest to poll for this tick: read only while
    /// there's room to keep the back-pressure invariant, write whenever
    /// anything is queued.
    #[must_use]
    pub fn interest(&self) -> Option<Interest> {
        let want_read = self.read_buf.space() >= READ_LOW_WATER;
        let want_write = !self.write_buf.is_empty();
        match (want_read, want_write) {
            (true, true) => Some(Interest::READABLE.add(Interest::WRITABLE)),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }

    /// Drains whatever is immediately available from the socket into the
    /// read buffer without blocking. Returns the number of bytes read;
    /// `Ok(0)` means the peer closed the connection.
    pub fn try_fill_read_buf(&mut self) -> io::Result<usize> {
        let mut total = 0;
        let mut scratch = [0u8; 64 * 1024];
        loop {
            match self.socket.try_read(&mut scratch) {
                Ok(0) => {
                    if total == 0 {
                        return Ok(0);
                    }
                    break;
                }
                Ok(n) => {
                    self.read_buf.add(&scratch[..n]);
                    total += n;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }

    /// Flushes as much of the write buffer as the socket accepts without
    /// blocking.
    pub fn try_flush_write_buf(&mut self) -> io::Result<usize> {
        let mut total = 0;
        loop {
            let pending = self.write_buf.peek();
            if pending.is_empty() {
                break;
            }
            match self.socket.try_write(pending) {
                Ok(0) => break,
                Ok(n) => {
                    self.write_buf.get(n);
                    total += n;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }
}
