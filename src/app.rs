//! Process wiring: builds the relay from [`Settings`], starts the listener,
//! the MQTT ingress and the dispatcher, and tears them down on shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Settings;
use crate::ingress::{IngressHandle, IngressState, MqttIngress};
use crate::relay::Relay;
use crate::transport::{self, ConnectionOptions};
use crate::utils::error::RelayError;

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// A running relay.
pub struct RelayService {
    relay: Arc<Relay>,
    local_addr: SocketAddr,
    ingress: IngressHandle,
    shutdown: watch::Sender<bool>,
    server: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

impl RelayService {
    /// Validates the settings, binds the listener and spawns every task.
    pub async fn start(settings: &Settings) -> Result<Self, RelayError> {
        settings.validate()?;

        let listener = transport::bind(&settings.listen_addr()).await?;
        let local_addr = listener.local_addr()?;

        let relay = Arc::new(Relay::new(&settings.relay));
        let (payload_tx, payload_rx) = mpsc::channel::<Bytes>(settings.relay.ingress_queue);
        let ingress = MqttIngress::new(&settings.mqtt, payload_tx)?.spawn();

        let dispatcher = {
            let relay = relay.clone();
            tokio::spawn(async move { relay.run_dispatcher(payload_rx).await })
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let server = tokio::spawn(transport::serve(
            listener,
            relay.registry().clone(),
            ConnectionOptions::from(&settings.relay),
            shutdown_rx,
        ));

        info!(
            mode = ?relay.mode(),
            topic = %settings.mqtt.topic,
            "relay started"
        );

        Ok(Self {
            relay,
            local_addr,
            ingress,
            shutdown,
            server,
            dispatcher,
        })
    }

    pub fn relay(&self) -> &Arc<Relay> {
        &self.relay
    }

    /// Address the WebSocket listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn ingress_state(&self) -> IngressState {
        self.ingress.state()
    }

    pub fn watch_ingress(&self) -> watch::Receiver<IngressState> {
        self.ingress.watch_state()
    }

    /// Stops the ingress (closing the MQTT session), then closes every
    /// subscriber connection. Payloads still queued are not flushed.
    pub async fn shutdown(self) {
        info!("shutting down relay");

        self.ingress.shutdown().await;
        self.dispatcher.abort();

        let _ = self.shutdown.send(true);
        if tokio::time::timeout(STOP_TIMEOUT, self.server).await.is_err() {
            warn!("subscriber connections did not close in time");
        }

        info!("relay stopped");
    }
}

/// Runs the relay until Ctrl-C.
pub async fn run(settings: Settings) -> Result<(), RelayError> {
    let service = RelayService::start(&settings).await?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
    }
    info!("Shutdown signal received. Exiting gracefully.");

    service.shutdown().await;
    Ok(())
}
