//! Relay engine
//!
//! This module contains the fan-out side of the relay:
//! - [`BroadcastEngine`] delivers one frame to every registered subscriber,
//!   each delivery bounded by the send timeout and isolated from the others
//! - [`Relay`] owns the registry and the engine, applies the validation mode
//!   to raw upstream payloads, and runs the dispatcher loop fed by the
//!   ingress channel
//!
//! Concurrency notes:
//! - The dispatcher handles one payload at a time and awaits the whole
//!   broadcast before taking the next one. Together with the FIFO outbound
//!   queue of each subscriber this keeps frames in source order.
//! - Deliveries inside one broadcast run concurrently, so a broadcast takes
//!   about one send timeout at worst, however many subscribers are stuck.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::config::RelaySettings;
use crate::relay::message::{TelemetryRecord, ValidationMode, validate, validate_lenient};
use crate::relay::registry::SubscriberRegistry;
use crate::utils::error::ValidationError;

/// Delivers frames to every subscriber in the registry.
#[derive(Debug, Clone)]
pub struct BroadcastEngine {
    registry: Arc<SubscriberRegistry>,
    send_timeout: Duration,
}

impl BroadcastEngine {
    pub fn new(registry: Arc<SubscriberRegistry>, send_timeout: Duration) -> Self {
        Self {
            registry,
            send_timeout,
        }
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// Serializes `record` once and delivers it to every subscriber.
    pub async fn broadcast(&self, record: &TelemetryRecord) {
        let text = match record.to_json() {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "failed to serialize telemetry record");
                return;
            }
        };
        self.deliver(WsMessage::text(text)).await;
    }

    /// Delivers an already built frame to every subscriber in a snapshot of
    /// the registry. Subscribers that fail are unregistered.
    pub async fn deliver(&self, frame: WsMessage) {
        let subscribers = self.registry.snapshot();
        if subscribers.is_empty() {
            trace!("no subscribers connected, frame dropped");
            return;
        }

        let timeout = self.send_timeout;
        let results = join_all(subscribers.iter().map(|subscriber| {
            let frame = frame.clone();
            async move { subscriber.send(frame, timeout).await }
        }))
        .await;

        let mut delivered = 0usize;
        let mut removed = 0usize;
        for result in results {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(subscriber = %e.subscriber(), error = %e, "delivery failed, removing subscriber");
                    if self.registry.unregister(e.subscriber()) {
                        removed += 1;
                    }
                }
            }
        }

        debug!(delivered, removed, "broadcast complete");
    }
}

/// The relay aggregate: subscriber registry, broadcast engine and validation
/// policy. Built once at startup and shared by the transport and the
/// dispatcher.
#[derive(Debug)]
pub struct Relay {
    registry: Arc<SubscriberRegistry>,
    engine: BroadcastEngine,
    mode: ValidationMode,
}

impl Relay {
    pub fn new(settings: &RelaySettings) -> Self {
        let registry = Arc::new(SubscriberRegistry::new());
        let engine = BroadcastEngine::new(
            registry.clone(),
            Duration::from_millis(settings.send_timeout_ms),
        );
        Self {
            registry,
            engine,
            mode: settings.validation_mode,
        }
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &BroadcastEngine {
        &self.engine
    }

    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    /// Validates one raw payload according to the validation mode and, if it
    /// passes, broadcasts it. A rejected payload is returned as an error and
    /// nothing is sent.
    pub async fn handle_payload(&self, raw: &[u8]) -> Result<(), ValidationError> {
        match self.mode {
            ValidationMode::Strict => {
                let record = validate(raw)?;
                self.engine.broadcast(&record).await;
            }
            ValidationMode::Lenient => {
                let text = validate_lenient(raw)?;
                self.engine.deliver(WsMessage::text(text)).await;
            }
        }
        Ok(())
    }

    /// Consumes raw payloads from the ingress channel until every sender is
    /// gone. Invalid payloads are logged and discarded.
    pub async fn run_dispatcher(&self, mut payloads: mpsc::Receiver<Bytes>) {
        while let Some(raw) = payloads.recv().await {
            if let Err(e) = self.handle_payload(&raw).await {
                warn!(error = %e, bytes = raw.len(), "discarding invalid payload");
            }
        }
        info!("ingress channel closed, dispatcher stopped");
    }
}
