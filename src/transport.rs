//! Byte-stream transports a [`Channel`](crate::channel::Channel) talks over.
//!
//! The [`Wire`] trait is the only view the handshake and message exchange have
//! of a connection: exact-length blocking reads, buffered writes that only hit
//! the peer on [`Wire::send`], a close, and a non-blocking check for bytes the
//! peer has sent but nobody has read yet.
//!
//! [`SocketWire`] is the TCP implementation used by the server.
use std::{
    io::{self, BufWriter, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
};

use log::trace;

/// Duplex byte stream owned by a single channel.
pub trait Wire {
    /// Reads exactly `n` bytes, blocking until they arrive.
    fn read(&mut self, n: usize) -> io::Result<Vec<u8>>;

    /// Buffers bytes for the next [`Wire::send`].
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Flushes everything written so far to the peer.
    fn send(&mut self) -> io::Result<()>;

    fn close(&mut self) -> io::Result<()>;

    /// Whether the peer has sent bytes that have not been read yet.
    /// Never blocks.
    fn has_pending_input(&mut self) -> io::Result<bool>;
}

pub struct SocketWire {
    stream: TcpStream,
    writer: BufWriter<TcpStream>,
    peer: Option<SocketAddr>,
}

impl SocketWire {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let peer = stream.peer_addr().ok();
        let writer = BufWriter::new(stream.try_clone()?);
        Ok(Self {
            stream,
            writer,
            peer,
        })
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }
}

impl Wire for SocketWire {
    fn read(&mut self, n: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0; n];
        self.stream.read_exact(&mut buf)?;
        trace!("read {n} bytes from {:?}", self.peer);
        Ok(buf)
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)
    }

    fn send(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        // Unsent output is dropped; the peer may already be gone.
        let _ = self.writer.flush();
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }

    fn has_pending_input(&mut self) -> io::Result<bool> {
        let mut buf = [0; 1];
        self.stream.set_nonblocking(true)?;
        let peeked = self.stream.peek(&mut buf);
        self.stream.set_nonblocking(false)?;

        match peeked {
            // Ok(0) is end of stream, not data.
            Ok(n) => Ok(n > 0),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// In-memory transport for unit tests.
///
/// Reads fail with `UnexpectedEof` without consuming anything when fewer
/// bytes than requested are available, so a test can feed the rest later.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct MemoryWire {
    input: std::collections::VecDeque<u8>,
    unsent: Vec<u8>,
    pub(crate) sent: Vec<u8>,
    pub(crate) reads: usize,
    pub(crate) flushes: usize,
    pub(crate) closed: bool,
    pub(crate) broken: bool,
}

#[cfg(test)]
impl MemoryWire {
    pub(crate) fn new(input: &[u8]) -> Self {
        Self {
            input: input.iter().copied().collect(),
            ..Default::default()
        }
    }

    pub(crate) fn feed(&mut self, bytes: &[u8]) {
        self.input.extend(bytes);
    }

    pub(crate) fn remaining(&self) -> usize {
        self.input.len()
    }
}

#[cfg(test)]
impl Wire for MemoryWire {
    fn read(&mut self, n: usize) -> io::Result<Vec<u8>> {
        if self.input.len() < n {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        self.reads += 1;
        Ok(self.input.drain(..n).collect())
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.broken || self.closed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        self.unsent.extend_from_slice(bytes);
        Ok(())
    }

    fn send(&mut self) -> io::Result<()> {
        if self.broken || self.closed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        self.flushes += 1;
        self.sent.append(&mut self.unsent);
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        Ok(())
    }

    fn has_pending_input(&mut self) -> io::Result<bool> {
        Ok(!self.input.is_empty())
    }
}
