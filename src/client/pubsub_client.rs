use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::sync::mpsc::Sender;
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::utils::error::DeliveryError;

/// Identifier assigned to a subscriber when it is registered.
pub type SubscriberId = String;

/// Generates a fresh identifier of the form `client-<uuid>`.
pub fn next_subscriber_id() -> SubscriberId {
    format!("client-{}", Uuid::new_v4())
}

/// Lifecycle of the connection behind a subscriber.
///
/// States only move forward: `Open -> Closing -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LivenessState {
    Open = 0,
    Closing = 1,
    Closed = 2,
}

impl LivenessState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LivenessState::Open,
            1 => LivenessState::Closing,
            _ => LivenessState::Closed,
        }
    }
}

/// Shared liveness flag written by the connection task and read by the
/// broadcast engine before every delivery.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicU8>);

impl Liveness {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(LivenessState::Open as u8)))
    }

    pub fn state(&self) -> LivenessState {
        LivenessState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == LivenessState::Open
    }

    pub fn mark_closing(&self) {
        self.advance(LivenessState::Closing);
    }

    pub fn mark_closed(&self) {
        self.advance(LivenessState::Closed);
    }

    fn advance(&self, to: LivenessState) {
        self.0.fetch_max(to as u8, Ordering::AcqRel);
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// What the transport hands to the registry when a connection is accepted.
#[derive(Debug)]
pub struct SubscriberHandle {
    sender: Sender<WsMessage>,
    liveness: Liveness,
}

impl SubscriberHandle {
    pub fn new(sender: Sender<WsMessage>, liveness: Liveness) -> Self {
        Self { sender, liveness }
    }
}

/// A registered subscriber.
///
/// Cloning is cheap: the clone shares the outbound queue and the liveness
/// flag. The registry hands out clones in snapshots; once the registry entry
/// and every snapshot clone are dropped, the outbound queue closes and the
/// connection's writer task shuts the socket down.
#[derive(Debug, Clone)]
pub struct Subscriber {
    id: SubscriberId,
    sender: Sender<WsMessage>,
    liveness: Liveness,
}

impl Subscriber {
    pub(crate) fn from_handle(id: SubscriberId, handle: SubscriberHandle) -> Self {
        Self {
            id,
            sender: handle.sender,
            liveness: handle.liveness,
        }
    }

    pub fn id(&self) -> &SubscriberId {
        &self.id
    }

    pub fn state(&self) -> LivenessState {
        self.liveness.state()
    }

    /// Queues `frame` for this subscriber, waiting at most `timeout` for room
    /// in its outbound queue.
    pub async fn send(&self, frame: WsMessage, timeout: Duration) -> Result<(), DeliveryError> {
        if !self.liveness.is_open() {
            return Err(DeliveryError::NotOpen(self.id.clone()));
        }

        match tokio::time::timeout(timeout, self.sender.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(DeliveryError::Closed(self.id.clone())),
            Err(_) => Err(DeliveryError::Timeout(self.id.clone())),
        }
    }
}
