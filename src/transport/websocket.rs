//! WebSocket transport
//!
//! Accepts subscriber connections and ties each one to the registry:
//! - every accepted connection gets a bounded outbound queue and is
//!   registered as a subscriber
//! - a writer task drains the queue into the socket, each write bounded by
//!   the write timeout
//! - the reader loop only watches for close; inbound frames are ignored
//! - on close, read error, shutdown or writer exit the subscriber is
//!   unregistered and the socket is dropped
//!
//! Dropping the last sender of a connection's queue (registry entry plus any
//! snapshot clones) ends its writer task. The reader sees that and drops its
//! half of the stream, which closes the socket even if the peer never reads.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_tungstenite::{WebSocketStream, accept_async};
use tracing::{debug, info, trace, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::client::{Liveness, SubscriberHandle, SubscriberId};
use crate::config::RelaySettings;
use crate::relay::SubscriberRegistry;
use crate::utils::error::RelayError;

type WsSink = SplitSink<WebSocketStream<TcpStream>, WsMessage>;

/// Per-connection limits.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionOptions {
    /// Frames buffered for a subscriber before deliveries start to wait.
    pub queue_capacity: usize,
    /// Longest a single socket write may take before the connection is dropped.
    pub write_timeout: Duration,
}

impl From<&RelaySettings> for ConnectionOptions {
    fn from(settings: &RelaySettings) -> Self {
        Self {
            queue_capacity: settings.subscriber_queue,
            write_timeout: Duration::from_millis(settings.send_timeout_ms),
        }
    }
}

/// Binds the listener. Failing here is fatal for the process.
pub async fn bind(addr: &str) -> Result<TcpListener, RelayError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| RelayError::Bind {
            addr: addr.to_string(),
            source,
        })?;

    info!("WebSocket server listening on ws://{}", listener.local_addr()?);
    Ok(listener)
}

/// Accepts connections until `shutdown` flips, then waits for every
/// connection task to close its socket.
pub async fn serve(
    listener: TcpListener,
    registry: Arc<SubscriberRegistry>,
    options: ConnectionOptions,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.changed() => break,
            Some(_) = connections.join_next(), if !connections.is_empty() => continue,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "failed to accept connection");
                    continue;
                }
            },
        };

        connections.spawn(handle_connection(
            stream,
            peer,
            registry.clone(),
            options,
            shutdown.clone(),
        ));
    }

    info!(open = connections.len(), "WebSocket listener stopped, closing subscribers");
    while connections.join_next().await.is_some() {}
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<SubscriberRegistry>,
    options: ConnectionOptions,
    mut shutdown: watch::Receiver<bool>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(peer = %peer, error = %e, "WebSocket handshake error");
            return;
        }
    };

    let (ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, rx) = mpsc::channel::<WsMessage>(options.queue_capacity);
    let liveness = Liveness::new();

    // Register client before doing anything else
    let client_id = registry.register(SubscriberHandle::new(tx, liveness.clone()));
    info!(subscriber = %client_id, peer = %peer, "subscriber connected");

    let mut writer = tokio::spawn(write_loop(
        ws_sender,
        rx,
        client_id.clone(),
        liveness.clone(),
        options.write_timeout,
        shutdown.clone(),
    ));

    let mut writer_done = false;
    loop {
        let msg = tokio::select! {
            _ = shutdown.changed() => break,
            joined = &mut writer => {
                writer_done = true;
                if let Err(e) = joined {
                    warn!(subscriber = %client_id, error = %e, "send loop panicked");
                }
                break;
            }
            msg = ws_receiver.next() => msg,
        };

        match msg {
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Ok(_)) => trace!(subscriber = %client_id, "ignoring inbound frame"),
            Some(Err(e)) => {
                debug!(subscriber = %client_id, error = %e, "read error");
                break;
            }
        }
    }

    liveness.mark_closing();
    registry.unregister(&client_id);

    if !writer_done {
        if let Err(e) = writer.await {
            warn!(subscriber = %client_id, error = %e, "send loop panicked");
        }
    }

    // The sink half is gone with the writer; dropping this half closes the TCP stream.
    drop(ws_receiver);
    liveness.mark_closed();
    info!(subscriber = %client_id, peer = %peer, "subscriber disconnected");
}

async fn write_loop(
    mut sink: WsSink,
    mut rx: mpsc::Receiver<WsMessage>,
    client_id: SubscriberId,
    liveness: Liveness,
    write_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        match tokio::time::timeout(write_timeout, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(subscriber = %client_id, error = %e, "socket write failed");
                break;
            }
            Err(_) => {
                warn!(subscriber = %client_id, "socket write timed out");
                break;
            }
        }
    }

    // Nothing more will be written to this socket.
    liveness.mark_closing();
    let _ = tokio::time::timeout(write_timeout, sink.close()).await;
    debug!(subscriber = %client_id, "send loop closed");
}
