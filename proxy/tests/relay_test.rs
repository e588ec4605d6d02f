use audit_relay_core::{CommandKind, QueryEvent};
use audit_relay_proxy::{AuditError, AuditSink, ProxyConfig, ProxyServer, ShutdownHandle, Transport};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Default)]
struct CollectingSink {
    events: Mutex<Vec<QueryEvent>>,
}

impl CollectingSink {
    fn events(&self) -> Vec<QueryEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl AuditSink for CollectingSink {
    fn record(&self, event: QueryEvent) -> Result<(), AuditError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }

    fn name(&self) -> &str {
        "collecting"
    }
}

/// Backend that echoes every byte back, then closes when the client does
async fn echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut r, mut w) = socket.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
                let _ = w.shutdown().await;
            });
        }
    });
    addr
}

/// Backend that reads until end of stream, then answers with the byte count
async fn counting_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut received = Vec::new();
                if socket.read_to_end(&mut received).await.is_ok() {
                    let reply = format!("received {}", received.len());
                    let _ = socket.write_all(reply.as_bytes()).await;
                }
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

struct Relay {
    addr: SocketAddr,
    transport: Arc<Transport>,
    shutdown: ShutdownHandle,
    sink: Arc<CollectingSink>,
}

async fn start_relay(config: ProxyConfig) -> Relay {
    let sink = Arc::new(CollectingSink::default());
    let server = ProxyServer::bind(config, Some(sink.clone() as Arc<dyn AuditSink>))
        .await
        .unwrap();
    let relay = Relay {
        addr: server.local_addr().unwrap(),
        transport: server.transport(),
        shutdown: server.shutdown_handle(),
        sink,
    };
    tokio::spawn(server.run());
    relay
}

async fn wait_until_idle(transport: &Transport) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while transport.live_sessions() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("sessions did not finish");
}

#[tokio::test]
async fn test_bytes_are_relayed_unchanged() {
    let relay = start_relay(ProxyConfig::for_testing(echo_backend().await)).await;

    let payload: Vec<u8> = (0..64 * 1024).map(|i| (i * 31 % 251) as u8).collect();
    let client = TcpStream::connect(relay.addr).await.unwrap();
    let (mut reader, mut writer) = client.into_split();

    let sent = payload.clone();
    let writing = tokio::spawn(async move {
        writer.write_all(&sent).await.unwrap();
        writer.shutdown().await.unwrap();
    });

    let mut received = Vec::new();
    reader.read_to_end(&mut received).await.unwrap();
    writing.await.unwrap();

    assert_eq!(received.len(), payload.len());
    assert!(received == payload);

    wait_until_idle(&relay.transport).await;
    assert_eq!(relay.transport.pool().outstanding(), 0);
    relay.shutdown.shutdown();
}

#[tokio::test]
async fn test_client_commands_are_audited() {
    let relay = start_relay(ProxyConfig::for_testing(echo_backend().await)).await;
    let mut client = TcpStream::connect(relay.addr).await.unwrap();

    let query = b"\x15\x00\x00\x00\x03SELECT * FROM t\r\n";
    client.write_all(query).await.unwrap();
    let mut echoed = vec![0u8; query.len()];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(echoed, query);

    let events = relay.sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].command, CommandKind::Query);
    assert_eq!(events[0].sql, "SELECT * FROM t\\r\\n");
    assert_eq!(events[0].client_port, client.local_addr().unwrap().port());
    assert_eq!(events[0].bind_port, relay.addr.port());

    relay.shutdown.shutdown();
}

#[tokio::test]
async fn test_short_chunk_is_forwarded_without_record() {
    let relay = start_relay(ProxyConfig::for_testing(echo_backend().await)).await;
    let mut client = TcpStream::connect(relay.addr).await.unwrap();

    client.write_all(b"\x01\x00\x00\x00").await.unwrap();
    let mut echoed = [0u8; 4];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"\x01\x00\x00\x00");

    assert!(relay.sink.events().is_empty());
    relay.shutdown.shutdown();
}

#[tokio::test]
async fn test_half_close_reaches_backend() {
    let relay = start_relay(ProxyConfig::for_testing(counting_backend().await)).await;
    let mut client = TcpStream::connect(relay.addr).await.unwrap();

    client.write_all(b"0123456789").await.unwrap();
    client.shutdown().await.unwrap();

    // Backend only answers after seeing end of stream
    let mut reply = String::new();
    client.read_to_string(&mut reply).await.unwrap();
    assert_eq!(reply, "received 10");

    relay.shutdown.shutdown();
}

#[tokio::test]
async fn test_dial_failure_only_ends_that_session() {
    let dead = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let relay = start_relay(ProxyConfig::for_testing(dead)).await;

    for _ in 0..3 {
        let mut client = TcpStream::connect(relay.addr).await.unwrap();
        let mut rest = Vec::new();
        // The relay drops the client once the dial fails
        let _ = client.read_to_end(&mut rest).await;
        assert!(rest.is_empty());
    }

    assert_eq!(relay.transport.live_sessions(), 0);
    relay.shutdown.shutdown();
}

#[tokio::test]
async fn test_concurrent_sessions_release_everything() {
    let relay = start_relay(ProxyConfig::for_testing(echo_backend().await)).await;

    let mut clients = Vec::new();
    for i in 0..16u8 {
        let addr = relay.addr;
        clients.push(tokio::spawn(async move {
            let mut client = TcpStream::connect(addr).await.unwrap();
            let packet = [0x05, 0x00, 0x00, 0x00, 0x02, b'a' + i];
            client.write_all(&packet).await.unwrap();
            let mut echoed = [0u8; 6];
            client.read_exact(&mut echoed).await.unwrap();
            assert_eq!(echoed, packet);
            client.shutdown().await.unwrap();
            let mut rest = Vec::new();
            client.read_to_end(&mut rest).await.unwrap();
        }));
    }
    for client in clients {
        client.await.unwrap();
    }

    wait_until_idle(&relay.transport).await;
    let pool = relay.transport.pool();
    assert_eq!(pool.outstanding(), 0);
    assert!(pool.allocated() <= 32);

    let events = relay.sink.events();
    assert_eq!(events.len(), 16);
    assert!(events.iter().all(|e| e.command == CommandKind::InitDb));

    relay.shutdown.shutdown();
}
