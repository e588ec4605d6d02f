//! Relay sessions
//!
//! A session pairs one accepted client socket with one freshly dialed
//! backend socket and pumps bytes both ways until both directions end.
//! Each direction runs as its own task:
//!
//! - forward (client to backend) runs every chunk through the [`Sniffer`]
//!   before writing it on, unchanged
//! - return (backend to client) copies bytes as they are
//!
//! A direction ends on its own read or write error, including a clean end
//! of stream. It then closes the read side of its source and the write side
//! of its destination, which lets the FIN travel on to the other peer while
//! the opposite direction keeps running.

use audit_relay_core::{BufferPool, SessionEndpoints, Timer};
use log::{debug, error, info};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use crate::audit::AuditSink;
use crate::error::{ProxyError, Result};
use crate::protocol::{Connection, ConnectionReader, ConnectionWriter, Sniffer};

/// Default backend connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Direction of a pipe within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to backend
    Forward,

    /// Backend to client
    Return,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => write!(f, "client -> backend"),
            Direction::Return => write!(f, "backend -> client"),
        }
    }
}

/// What one direction moved before it ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectionStats {
    /// Bytes written to the destination
    pub bytes: u64,

    /// Time from the first read attempt to the half-close
    pub elapsed: Duration,
}

/// Summary of a finished session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Bytes relayed from client to backend
    pub read_bytes: u64,

    /// Bytes relayed from backend to client
    pub written_bytes: u64,

    /// Time spent dialing the backend
    pub connect_time: Duration,

    /// Time from the end of the dial until both directions ended
    pub transfer_time: Duration,

    /// Sessions still live when this one ended, this one included
    pub live_sessions: usize,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "r: {} w: {} ct: {:.3} t: {:.3} [#{}]",
            self.read_bytes,
            self.written_bytes,
            self.connect_time.as_secs_f64(),
            self.transfer_time.as_secs_f64(),
            self.live_sessions
        )
    }
}

/// Keeps the live session counter up to date for the lifetime of a session
struct SessionGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> SessionGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self { counter }
    }

    fn live(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Per-process relay engine shared by all sessions
pub struct Transport {
    /// Resolved backend address
    backend_addr: SocketAddr,

    /// Read buffers shared by all connections
    pool: BufferPool,

    /// Backend connect timeout
    connect_timeout: Duration,

    /// Audit sink handed to every sniffer
    sink: Option<Arc<dyn AuditSink>>,

    /// Log every classified command
    verbose: bool,

    /// Sessions currently running
    live: AtomicUsize,
}

impl Transport {
    /// Create a transport relaying to `backend_addr`
    pub fn new(backend_addr: SocketAddr, pool: BufferPool) -> Self {
        Self {
            backend_addr,
            pool,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            sink: None,
            verbose: false,
            live: AtomicUsize::new(0),
        }
    }

    /// Set the backend connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Send classified commands to an audit sink
    pub fn with_audit_sink(mut self, sink: Option<Arc<dyn AuditSink>>) -> Self {
        self.sink = sink;
        self
    }

    /// Log every classified command
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Backend the transport dials
    pub fn backend_addr(&self) -> SocketAddr {
        self.backend_addr
    }

    /// Buffer pool shared by all sessions
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Number of sessions currently running
    pub fn live_sessions(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Relay one accepted client until both directions have ended
    ///
    /// A failed dial ends only this session; the client socket is dropped.
    pub async fn handle(&self, client: TcpStream) -> Result<SessionStats> {
        let mut timer = Timer::new("session").with_warning_threshold(self.connect_timeout / 2);

        let backend = self.dial().await?;
        let connect_time = timer.checkpoint("connect");

        let guard = SessionGuard::enter(&self.live);

        let client = Connection::new(client, &self.pool)?;
        let backend = Connection::new(backend, &self.pool)?;
        info!("proxy: {} ==> {}", backend.local_addr(), backend.peer_addr());

        let sniffer = Sniffer::new(
            SessionEndpoints {
                client: client.peer_addr(),
                server: backend.peer_addr(),
                bind_port: client.local_addr().port(),
            },
            self.sink.clone(),
            self.verbose,
        );

        let (client_reader, client_writer) = client.into_split();
        let (backend_reader, backend_writer) = backend.into_split();

        let forward: JoinHandle<DirectionStats> = tokio::spawn(pipe(
            client_reader,
            backend_writer,
            Direction::Forward,
            Some(sniffer),
        ));
        let backward: JoinHandle<DirectionStats> = tokio::spawn(pipe(
            backend_reader,
            client_writer,
            Direction::Return,
            None,
        ));

        let (forward, backward) = tokio::join!(forward, backward);
        let forward = forward.unwrap_or_else(|e| {
            error!("Forward pipe task failed: {}", e);
            DirectionStats::default()
        });
        let backward = backward.unwrap_or_else(|e| {
            error!("Return pipe task failed: {}", e);
            DirectionStats::default()
        });

        let stats = SessionStats {
            read_bytes: forward.bytes,
            written_bytes: backward.bytes,
            connect_time,
            transfer_time: timer.elapsed(),
            live_sessions: guard.live(),
        };
        info!("{}", stats);

        Ok(stats)
    }

    async fn dial(&self) -> Result<TcpStream> {
        let addr = self.backend_addr;
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(ProxyError::Dial {
                addr: addr.to_string(),
                source,
            }),
            Err(_) => Err(ProxyError::DialTimeout {
                addr: addr.to_string(),
                timeout: self.connect_timeout,
            }),
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("backend_addr", &self.backend_addr)
            .field("connect_timeout", &self.connect_timeout)
            .field("verbose", &self.verbose)
            .field("live", &self.live_sessions())
            .finish()
    }
}

/// Pump one direction until its source or destination fails
///
/// Each chunk is written before the next read starts, so bytes reach the
/// destination in the order they were read.
pub async fn pipe(
    mut src: ConnectionReader,
    mut dst: ConnectionWriter,
    direction: Direction,
    sniffer: Option<Sniffer>,
) -> DirectionStats {
    let started = Instant::now();
    let mut bytes = 0u64;

    loop {
        let chunk = match src.read().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                debug!("{}: end of stream", direction);
                break;
            }
            Err(e) => {
                debug!("{}: read failed: {}", direction, e);
                break;
            }
        };

        if let Some(sniffer) = &sniffer {
            sniffer.inspect(chunk);
        }

        if let Err(e) = dst.write(chunk).await {
            debug!("{}: write failed: {}", direction, e);
            break;
        }
        bytes += chunk.len() as u64;
    }

    if let Err(e) = src.close_read() {
        debug!("{}: close read: {}", direction, e);
    }
    if let Err(e) = dst.close_write().await {
        debug!("{}: close write: {}", direction, e);
    }

    let elapsed = started.elapsed();
    debug!("{}: done, {} bytes in {:.3}s", direction, bytes, elapsed.as_secs_f64());

    DirectionStats { bytes, elapsed }
}
