use crate::relay::{BroadcastEngine, SubscriberRegistry, TelemetryRecord};
use crate::tests::support::wait_until;
use crate::transport::websocket::{ConnectionOptions, bind, serve};
use crate::utils::error::RelayError;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

struct Server {
    addr: SocketAddr,
    registry: Arc<SubscriberRegistry>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

async fn start_server() -> Server {
    let listener = bind("127.0.0.1:0").await.expect("bind failed");
    let addr = listener.local_addr().unwrap();
    let registry = Arc::new(SubscriberRegistry::new());
    let (shutdown, shutdown_rx) = watch::channel(false);
    let options = ConnectionOptions {
        queue_capacity: 8,
        write_timeout: Duration::from_millis(200),
    };

    let task = tokio::spawn(serve(listener, registry.clone(), options, shutdown_rx));
    Server {
        addr,
        registry,
        shutdown,
        task,
    }
}

#[tokio::test]
async fn test_connect_registers_and_close_unregisters() {
    let server = start_server().await;
    let (mut ws, _) = connect_async(format!("ws://{}", server.addr))
        .await
        .expect("WebSocket handshake failed");

    let registry = server.registry.clone();
    wait_until(|| registry.len() == 1).await;

    ws.close(None).await.expect("Failed to close WebSocket");
    wait_until(|| registry.is_empty()).await;
}

#[tokio::test]
async fn test_frames_reach_client_and_inbound_frames_are_ignored() {
    let server = start_server().await;
    let (mut ws, _) = connect_async(format!("ws://{}", server.addr))
        .await
        .expect("WebSocket handshake failed");
    let registry = server.registry.clone();
    wait_until(|| registry.len() == 1).await;

    // Whatever a subscriber says is not acted upon.
    ws.send(WsMessage::Text(r#"{"type":"subscribe"}"#.into()))
        .await
        .unwrap();

    let engine = BroadcastEngine::new(server.registry.clone(), Duration::from_millis(200));
    engine
        .broadcast(&TelemetryRecord::new(1.0, 2.0, 3.0, "2024-01-01T00:00:00Z"))
        .await;

    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("no frame received")
        .expect("stream ended")
        .unwrap();
    assert_eq!(
        frame.to_text().unwrap(),
        r#"{"lat":1,"lng":2,"speed":3,"datetime":"2024-01-01T00:00:00Z"}"#
    );
    assert_eq!(server.registry.len(), 1);
}

#[tokio::test]
async fn test_shutdown_closes_subscribers() {
    let server = start_server().await;
    let (mut ws, _) = connect_async(format!("ws://{}", server.addr))
        .await
        .expect("WebSocket handshake failed");
    let registry = server.registry.clone();
    wait_until(|| registry.len() == 1).await;

    server.shutdown.send(true).unwrap();

    // The server says goodbye with a close frame (or just drops the stream).
    loop {
        match tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("connection not closed")
        {
            Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => break,
            Some(Ok(_)) => continue,
        }
    }

    tokio::time::timeout(Duration::from_secs(5), server.task)
        .await
        .expect("serve did not return")
        .unwrap();
    assert!(server.registry.is_empty());
}

#[tokio::test]
async fn test_bind_reports_address_in_use() {
    let listener = bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let err = bind(&addr).await.unwrap_err();
    match err {
        RelayError::Bind { addr: reported, .. } => assert_eq!(reported, addr),
        other => panic!("Expected Bind error, got {:?}", other),
    }
}

/// Performs the client side of the opening handshake on a raw socket, so the
/// test controls exactly when (and whether) the socket is read.
async fn raw_handshake(addr: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET / HTTP/1.1\r\nHost: {addr}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    // Read the response byte by byte so no frame data is consumed.
    let mut response = Vec::new();
    while !response.ends_with(b"\r\n\r\n") {
        response.push(stream.read_u8().await.unwrap());
    }
    assert!(response.starts_with(b"HTTP/1.1 101"));
    stream
}

#[tokio::test]
async fn test_stalled_subscriber_is_removed_and_disconnected() {
    let server = start_server().await;
    let mut stream = raw_handshake(server.addr).await;
    let registry = server.registry.clone();
    wait_until(|| registry.len() == 1).await;

    // The peer never reads, so socket buffers fill, writes stall past the
    // write timeout and deliveries start failing.
    let engine = BroadcastEngine::new(server.registry.clone(), Duration::from_millis(200));
    let frame = WsMessage::text("x".repeat(256 * 1024));
    for _ in 0..500 {
        if server.registry.is_empty() {
            break;
        }
        engine.deliver(frame.clone()).await;
    }
    assert!(server.registry.is_empty(), "stalled subscriber never removed");

    // Draining now must end in EOF (or a reset): the server dropped the socket.
    let closed = tokio::time::timeout(Duration::from_secs(10), async {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "connection still open after removal");

    // The connection task has finished, so shutdown completes at once.
    server.shutdown.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), server.task)
        .await
        .expect("serve did not return")
        .unwrap();
}
