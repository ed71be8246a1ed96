use serde::Deserialize;
use url::Url;
use uuid::Uuid;

use crate::relay::message::ValidationMode;
use crate::utils::error::RelayError;

/// Port used when the broker URL does not name one.
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Top-level configuration settings for the application.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub mqtt: MqttSettings,
    pub relay: RelaySettings,
    pub log: LogSettings,
}

/// Where the WebSocket listener binds.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Upstream MQTT connection and subscription.
#[derive(Debug, Deserialize, Clone)]
pub struct MqttSettings {
    pub broker_url: String,
    pub topic: String,
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub subscribe_retry_ms: u64,
}

/// Fan-out behaviour.
#[derive(Debug, Deserialize, Clone)]
pub struct RelaySettings {
    pub validation_mode: ValidationMode,
    pub send_timeout_ms: u64,
    pub subscriber_queue: usize,
    pub ingress_queue: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub mqtt: Option<PartialMqttSettings>,
    pub relay: Option<PartialRelaySettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialMqttSettings {
    pub broker_url: Option<String>,
    pub topic: Option<String>,
    pub client_id: Option<String>,
    pub keep_alive_secs: Option<u64>,
    pub reconnect_base_ms: Option<u64>,
    pub reconnect_max_ms: Option<u64>,
    pub subscribe_retry_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialRelaySettings {
    pub validation_mode: Option<ValidationMode>,
    pub send_timeout_ms: Option<u64>,
    pub subscriber_queue: Option<usize>,
    pub ingress_queue: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl PartialSettings {
    /// Fills every value that was not given from `default`.
    pub fn merge(self, default: Settings) -> Settings {
        let server = self.server.unwrap_or_default();
        let mqtt = self.mqtt.unwrap_or_default();
        let relay = self.relay.unwrap_or_default();
        let log = self.log.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(default.server.host),
                port: server.port.unwrap_or(default.server.port),
            },
            mqtt: MqttSettings {
                broker_url: mqtt.broker_url.unwrap_or(default.mqtt.broker_url),
                topic: mqtt.topic.unwrap_or(default.mqtt.topic),
                client_id: mqtt.client_id.unwrap_or(default.mqtt.client_id),
                keep_alive_secs: mqtt.keep_alive_secs.unwrap_or(default.mqtt.keep_alive_secs),
                reconnect_base_ms: mqtt
                    .reconnect_base_ms
                    .unwrap_or(default.mqtt.reconnect_base_ms),
                reconnect_max_ms: mqtt.reconnect_max_ms.unwrap_or(default.mqtt.reconnect_max_ms),
                subscribe_retry_ms: mqtt
                    .subscribe_retry_ms
                    .unwrap_or(default.mqtt.subscribe_retry_ms),
            },
            relay: RelaySettings {
                validation_mode: relay
                    .validation_mode
                    .unwrap_or(default.relay.validation_mode),
                send_timeout_ms: relay.send_timeout_ms.unwrap_or(default.relay.send_timeout_ms),
                subscriber_queue: relay
                    .subscriber_queue
                    .unwrap_or(default.relay.subscriber_queue),
                ingress_queue: relay.ingress_queue.unwrap_or(default.relay.ingress_queue),
            },
            log: LogSettings {
                level: log.level.unwrap_or(default.log.level),
            },
        }
    }
}

impl Settings {
    /// Address the WebSocket listener binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Rejects values the relay cannot run with.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.relay.send_timeout_ms == 0 {
            return Err(RelayError::Config(
                "relay.send_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.relay.subscriber_queue == 0 || self.relay.ingress_queue == 0 {
            return Err(RelayError::Config(
                "relay queue sizes must be greater than zero".into(),
            ));
        }
        if self.mqtt.topic.trim().is_empty() {
            return Err(RelayError::Config("mqtt.topic must not be empty".into()));
        }
        self.mqtt.broker_address()?;
        Ok(())
    }
}

impl MqttSettings {
    /// Host and port of the broker, parsed from `broker_url`
    /// (`mqtt://host[:port]` or `tcp://host[:port]`).
    pub fn broker_address(&self) -> Result<(String, u16), RelayError> {
        let url = Url::parse(&self.broker_url).map_err(|e| {
            RelayError::Config(format!("invalid mqtt.broker_url `{}`: {e}", self.broker_url))
        })?;

        if !matches!(url.scheme(), "mqtt" | "tcp") {
            return Err(RelayError::Config(format!(
                "unsupported broker scheme `{}` (expected mqtt or tcp)",
                url.scheme()
            )));
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| {
                RelayError::Config(format!("mqtt.broker_url `{}` has no host", self.broker_url))
            })?;

        Ok((host.to_string(), url.port().unwrap_or(DEFAULT_MQTT_PORT)))
    }
}

/// Provides default values for `Settings`.
///
/// Mirrors a stock local setup: a broker on localhost, GPS fixes on
/// `gps/data`, subscribers on port 8080.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            mqtt: MqttSettings {
                broker_url: format!("mqtt://localhost:{DEFAULT_MQTT_PORT}"),
                topic: "gps/data".to_string(),
                client_id: format!("gpsrelay-{}", Uuid::new_v4().simple()),
                keep_alive_secs: 30,
                reconnect_base_ms: 500,
                reconnect_max_ms: 30_000,
                subscribe_retry_ms: 2_000,
            },
            relay: RelaySettings {
                validation_mode: ValidationMode::Strict,
                send_timeout_ms: 1_000,
                subscriber_queue: 64,
                ingress_queue: 256,
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}
