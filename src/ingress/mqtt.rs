//! MQTT ingress
//!
//! Runs the `rumqttc` event loop for the single upstream topic:
//! - subscribes every time the broker accepts a connection (sessions are
//!   clean, so a reconnect always needs a fresh subscription)
//! - retries a rejected subscription after `subscribe_retry_ms`
//! - forwards every PUBLISH payload, untouched, into the ingress channel
//! - on a connection error waits for the backoff delay and polls again,
//!   which makes `rumqttc` reconnect
//!
//! The current [`IngressState`] is published on a `watch` channel.

use std::time::Duration;

use bytes::Bytes;
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubscribeReasonCode,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::MqttSettings;
use crate::ingress::backoff::Backoff;
use crate::ingress::state::{IngressEvent, IngressState};
use crate::utils::error::{IngressError, RelayError};

/// Capacity of the request queue between `AsyncClient` and the event loop.
const REQUEST_QUEUE: usize = 16;

/// How long shutdown waits for the DISCONNECT to go out.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub struct MqttIngress {
    client: AsyncClient,
    eventloop: EventLoop,
    broker: String,
    topic: String,
    subscribe_retry: Duration,
    backoff: Backoff,
    payloads: mpsc::Sender<Bytes>,
    state: IngressState,
    state_tx: watch::Sender<IngressState>,
    // At most one delayed SUBSCRIBE is pending; a new CONNACK or shutdown
    // cancels it.
    resubscribe: Option<JoinHandle<()>>,
}

/// Handle kept by the runtime to observe and stop a spawned [`MqttIngress`].
pub struct IngressHandle {
    state: watch::Receiver<IngressState>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MqttIngress {
    /// Prepares the client. Nothing touches the network until [`spawn`](Self::spawn).
    pub fn new(settings: &MqttSettings, payloads: mpsc::Sender<Bytes>) -> Result<Self, RelayError> {
        let (host, port) = settings.broker_address()?;

        let mut options = MqttOptions::new(settings.client_id.clone(), host.clone(), port);
        options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs));
        options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(options, REQUEST_QUEUE);
        let (state_tx, _) = watch::channel(IngressState::Disconnected);

        Ok(Self {
            client,
            eventloop,
            broker: format!("{host}:{port}"),
            topic: settings.topic.clone(),
            subscribe_retry: Duration::from_millis(settings.subscribe_retry_ms),
            backoff: Backoff::new(
                Duration::from_millis(settings.reconnect_base_ms),
                Duration::from_millis(settings.reconnect_max_ms),
            ),
            payloads,
            state: IngressState::Disconnected,
            state_tx,
            resubscribe: None,
        })
    }

    pub fn spawn(self) -> IngressHandle {
        let state = self.state_tx.subscribe();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        IngressHandle {
            state,
            shutdown,
            task,
        }
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        self.transition(IngressEvent::Connect);
        info!(broker = %self.broker, topic = %self.topic, "connecting to MQTT broker");

        loop {
            let event = tokio::select! {
                _ = shutdown.changed() => break,
                event = self.eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!(broker = %self.broker, "connected to MQTT broker");
                    self.backoff.reset();
                    self.cancel_resubscribe();
                    self.transition(IngressEvent::ConnectionAccepted);
                    self.request_subscription();
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    let rejected = ack
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure));
                    if rejected {
                        let err = IngressError::Subscription {
                            topic: self.topic.clone(),
                            reason: "broker rejected the subscription".into(),
                        };
                        error!(
                            error = %err,
                            retry_in_ms = self.subscribe_retry.as_millis() as u64,
                            "subscription failed"
                        );
                        self.transition(IngressEvent::SubscriptionRejected);
                        self.schedule_resubscribe();
                    } else {
                        info!(topic = %self.topic, "subscribed to topic");
                        self.transition(IngressEvent::SubscriptionGranted);
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    debug!(
                        topic = %publish.topic,
                        bytes = publish.payload.len(),
                        "received message"
                    );
                    if self.payloads.send(publish.payload).await.is_err() {
                        info!("ingress channel closed, stopping MQTT ingress");
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    let err = IngressError::from(e);
                    let delay = self.backoff.next_delay();
                    error!(
                        error = %err,
                        retry_in_ms = delay.as_millis() as u64,
                        "MQTT connection lost"
                    );
                    self.transition(IngressEvent::ConnectionLost);

                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.cancel_resubscribe();
        self.disconnect().await;
        self.transition(IngressEvent::Shutdown);
        info!("MQTT ingress stopped");
    }

    fn request_subscription(&mut self) {
        if let Err(e) = self.client.try_subscribe(self.topic.clone(), QoS::AtMostOnce) {
            warn!(topic = %self.topic, error = %e, "could not queue subscription request");
            self.schedule_resubscribe();
        }
    }

    fn schedule_resubscribe(&mut self) {
        self.cancel_resubscribe();

        let client = self.client.clone();
        let topic = self.topic.clone();
        let delay = self.subscribe_retry;

        self.resubscribe = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            debug!(topic = %topic, "retrying subscription");
            if let Err(e) = client.subscribe(topic.clone(), QoS::AtMostOnce).await {
                warn!(topic = %topic, error = %e, "subscription retry could not be queued");
            }
        }));
    }

    fn cancel_resubscribe(&mut self) {
        if let Some(task) = self.resubscribe.take() {
            task.abort();
        }
    }

    // Best effort: queue a DISCONNECT and poll until it has been written or
    // the connection is gone.
    async fn disconnect(&mut self) {
        if !matches!(
            self.state,
            IngressState::Connected | IngressState::Subscribed
        ) {
            return;
        }
        if self.client.try_disconnect().is_err() {
            return;
        }

        let flush = async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, flush).await.is_err() {
            warn!("timed out sending MQTT disconnect");
        }
    }

    fn transition(&mut self, event: IngressEvent) {
        let next = self.state.on(event);
        if next != self.state {
            debug!(from = %self.state, to = %next, "ingress state changed");
            self.state = next;
            self.state_tx.send_replace(next);
        }
    }
}

impl Drop for MqttIngress {
    fn drop(&mut self) {
        self.cancel_resubscribe();
    }
}

impl IngressHandle {
    pub fn state(&self) -> IngressState {
        *self.state.borrow()
    }

    /// A receiver that sees every state change from now on.
    pub fn watch_state(&self) -> watch::Receiver<IngressState> {
        self.state.clone()
    }

    /// Stops the event loop, sending a DISCONNECT if connected.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let mut task = self.task;
        if tokio::time::timeout(SHUTDOWN_GRACE * 2, &mut task).await.is_err() {
            warn!("MQTT ingress did not stop in time, aborting");
            task.abort();
        }
    }
}
