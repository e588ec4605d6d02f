//! Relay connection wrapper
//!
//! A [`Connection`] owns one TCP socket and one read buffer borrowed from
//! the [`BufferPool`]. Its read and write sides close independently, the way
//! TCP half-close works: shutting down the read side of a socket leaves its
//! write side usable and the other way round.
//!
//! For relaying, a connection is split into a [`ConnectionReader`] and a
//! [`ConnectionWriter`] which are driven by different tasks. The borrowed
//! buffer travels with the reader. When the read side closes while the
//! write side is still open the buffer is parked in the state shared by both
//! halves, and it goes back to the pool when the second side closes.

use audit_relay_core::{BufferPool, PooledBuffer};
use log::trace;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Open/closed flags of both directions plus the parked buffer
#[derive(Debug)]
struct HalfState {
    /// Whether the read side is still open
    read_open: bool,

    /// Whether the write side is still open
    write_open: bool,

    /// Buffer waiting for the write side to close
    parked: Option<PooledBuffer>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<HalfState>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(HalfState {
                read_open: true,
                write_open: true,
                parked: None,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, HalfState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mark the read side closed; the buffer is released once both sides are
    fn close_read(&self, buffer: PooledBuffer) {
        let mut state = self.state();
        state.read_open = false;
        if state.write_open {
            state.parked = Some(buffer);
        } else {
            drop(state);
            drop(buffer);
        }
    }

    fn close_write(&self) {
        let mut state = self.state();
        state.write_open = false;
        if !state.read_open {
            let parked = state.parked.take();
            drop(state);
            drop(parked);
        }
    }

    fn is_closed(&self) -> bool {
        let state = self.state();
        !state.read_open && !state.write_open
    }
}

fn not_connected(side: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, format!("{} side closed", side))
}

/// Read half of a relay connection, owning the borrowed buffer
#[derive(Debug)]
pub struct ConnectionReader {
    half: OwnedReadHalf,
    buffer: Option<PooledBuffer>,
    shared: Arc<Shared>,
}

impl ConnectionReader {
    /// Read the next chunk into the borrowed buffer
    ///
    /// Returns `Ok(None)` on end of stream. The chunk is at most one buffer
    /// long and is valid until the next call.
    pub async fn read(&mut self) -> io::Result<Option<&[u8]>> {
        let buffer = self.buffer.as_mut().ok_or_else(|| not_connected("read"))?;
        let n = self.half.read(&mut buffer[..]).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(&buffer[..n]))
    }

    /// Shut down the read side of the socket
    ///
    /// Idempotent. The buffer stops being usable for reads straight away.
    pub fn close_read(&mut self) -> io::Result<()> {
        let Some(buffer) = self.buffer.take() else {
            return Ok(());
        };
        let stream: &TcpStream = self.half.as_ref();
        let result = socket2::SockRef::from(stream).shutdown(Shutdown::Read);
        self.shared.close_read(buffer);
        if let Err(ref e) = result {
            trace!("shutdown(read) failed: {}", e);
        }
        result
    }

    /// Whether the read side is still open
    pub fn is_open(&self) -> bool {
        self.buffer.is_some()
    }

    /// Whether both sides of the connection are closed
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

/// Write half of a relay connection
#[derive(Debug)]
pub struct ConnectionWriter {
    half: OwnedWriteHalf,
    shared: Arc<Shared>,
    open: bool,
}

impl ConnectionWriter {
    /// Write the whole chunk to the socket
    pub async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        if !self.open {
            return Err(not_connected("write"));
        }
        self.half.write_all(data).await
    }

    /// Shut down the write side of the socket, sending FIN to the peer
    ///
    /// Idempotent.
    pub async fn close_write(&mut self) -> io::Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        let result = self.half.shutdown().await;
        self.shared.close_write();
        if let Err(ref e) = result {
            trace!("shutdown(write) failed: {}", e);
        }
        result
    }

    /// Whether the write side is still open
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Whether both sides of the connection are closed
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

/// A socket with a pooled read buffer and independently closable sides
#[derive(Debug)]
pub struct Connection {
    reader: ConnectionReader,
    writer: ConnectionWriter,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
}

impl Connection {
    /// Wrap a socket, borrowing one buffer from the pool
    pub fn new(stream: TcpStream, pool: &BufferPool) -> io::Result<Self> {
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        stream.set_nodelay(true)?;

        let shared = Arc::new(Shared::new());
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: ConnectionReader {
                half: read_half,
                buffer: Some(pool.acquire()),
                shared: shared.clone(),
            },
            writer: ConnectionWriter {
                half: write_half,
                shared,
                open: true,
            },
            peer_addr,
            local_addr,
        })
    }

    /// Remote address of the socket
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Local address of the socket
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Split into halves that can be driven from different tasks
    pub fn into_split(self) -> (ConnectionReader, ConnectionWriter) {
        (self.reader, self.writer)
    }

    /// Read the next chunk, see [`ConnectionReader::read`]
    pub async fn read(&mut self) -> io::Result<Option<&[u8]>> {
        self.reader.read().await
    }

    /// Write a whole chunk, see [`ConnectionWriter::write`]
    pub async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer.write(data).await
    }

    /// Shut down the read side
    pub fn close_read(&mut self) -> io::Result<()> {
        self.reader.close_read()
    }

    /// Shut down the write side
    pub async fn close_write(&mut self) -> io::Result<()> {
        self.writer.close_write().await
    }

    /// Whether both sides are closed
    pub fn is_closed(&self) -> bool {
        self.reader.is_closed()
    }
}
