//! Server implementation for the audit relay
//!
//! The server owns the listening socket and spawns one task per accepted
//! client. Everything past the accept is handled by the [`Transport`].

use audit_relay_core::BufferPool;
use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::audit::AuditSink;
use crate::config::{normalize_addr, resolve_addr, ProxyConfig};
use crate::error::{ProxyError, Result};
use crate::session::Transport;

/// Main relay server
pub struct ProxyServer {
    /// Server configuration
    config: ProxyConfig,

    /// Listening socket
    listener: TcpListener,

    /// Relay engine shared by all sessions
    transport: Arc<Transport>,

    /// Set to `true` to stop accepting
    shutdown: Arc<watch::Sender<bool>>,
}

/// Handle used to stop a running server from another task
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Ask the server to stop accepting new clients
    ///
    /// Sessions already running are left to finish on their own.
    pub fn shutdown(&self) {
        self.sender.send_replace(true);
    }
}

impl ProxyServer {
    /// Resolve the configured addresses and bind the listener
    ///
    /// Resolution and bind failures are fatal and returned to the caller.
    pub async fn bind(config: ProxyConfig, sink: Option<Arc<dyn AuditSink>>) -> Result<Self> {
        let bind_addr = resolve_addr(&config.bind_addr).await?;
        let backend_addr = resolve_addr(&config.backend_addr).await?;

        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|source| ProxyError::Bind {
                addr: normalize_addr(&config.bind_addr),
                source,
            })?;

        let pool = BufferPool::new(config.pool_config());
        let transport = Transport::new(backend_addr, pool)
            .with_connect_timeout(config.connect_timeout())
            .with_audit_sink(sink)
            .with_verbose(config.verbose);

        let (sender, _) = watch::channel(false);

        Ok(Self {
            config,
            listener,
            transport: Arc::new(transport),
            shutdown: Arc::new(sender),
        })
    }

    /// Get the server configuration
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Relay engine shared by all sessions
    pub fn transport(&self) -> Arc<Transport> {
        self.transport.clone()
    }

    /// Get a handle that stops the accept loop
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            sender: self.shutdown.clone(),
        }
    }

    /// Accept clients until shut down
    ///
    /// Accept errors are logged and the loop continues. In oneshot mode the
    /// server stops after the first session that reached the backend ends;
    /// a failed dial does not count.
    pub async fn run(self) -> Result<()> {
        let mut stop = self.shutdown.subscribe();
        info!(
            "Relaying {} to {}",
            self.local_addr()?,
            self.transport.backend_addr()
        );

        loop {
            if *stop.borrow() {
                break;
            }

            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                accepted = self.listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                            continue;
                        }
                    };

                    match socket.local_addr() {
                        Ok(local) => info!("client: {} ==> {}", peer, local),
                        Err(e) => warn!("client: {} ==> unknown local address: {}", peer, e),
                    }

                    let transport = self.transport.clone();
                    let shutdown = self.shutdown_handle();
                    let oneshot = self.config.oneshot;
                    tokio::spawn(async move {
                        match transport.handle(socket).await {
                            Ok(_) if oneshot => {
                                info!("Oneshot session finished, stopping");
                                shutdown.shutdown();
                            }
                            Ok(_) => {}
                            Err(e) => error!("Session for {} failed: {}", peer, e),
                        }
                    });
                }
            }
        }

        info!("Server stopped accepting connections");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn sink_backend() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let _ = socket.read_to_end(&mut buf).await;
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_bind_failure_is_fatal() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = ProxyConfig::for_testing("127.0.0.1:3306".parse().unwrap());
        config.bind_addr = taken.local_addr().unwrap().to_string();

        let result = ProxyServer::bind(config, None).await;
        assert!(matches!(result, Err(ProxyError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_unresolvable_backend_is_fatal() {
        let mut config = ProxyConfig::for_testing("127.0.0.1:3306".parse().unwrap());
        config.backend_addr = "no port here".to_string();

        let result = ProxyServer::bind(config, None).await;
        assert!(matches!(result, Err(ProxyError::Resolve { .. })));
    }

    #[tokio::test]
    async fn test_shutdown_stops_run() {
        let backend = sink_backend().await;
        let server = ProxyServer::bind(ProxyConfig::for_testing(backend), None)
            .await
            .unwrap();
        let handle = server.shutdown_handle();
        let task = tokio::spawn(server.run());

        handle.shutdown();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_oneshot_stops_after_first_session() {
        let backend = sink_backend().await;
        let mut config = ProxyConfig::for_testing(backend);
        config.oneshot = true;

        let server = ProxyServer::bind(config, None).await.unwrap();
        let addr = server.local_addr().unwrap();
        let task = tokio::spawn(server.run());

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"\x01\x00\x00\x00\x01").await.unwrap();
        client.shutdown().await.unwrap();
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_oneshot_keeps_accepting_after_failed_dial() {
        let dead = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let mut config = ProxyConfig::for_testing(dead);
        config.oneshot = true;

        let server = ProxyServer::bind(config, None).await.unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.shutdown_handle();
        let task = tokio::spawn(server.run());

        for _ in 0..2 {
            // Each client is accepted, then dropped once the dial fails
            let mut client = TcpStream::connect(addr).await.unwrap();
            let mut rest = Vec::new();
            let _ = client.read_to_end(&mut rest).await;
            assert!(rest.is_empty());
        }

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!task.is_finished());

        handle.shutdown();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
