//! The `ingress` module owns the upstream side of the relay: the MQTT
//! connection, the topic subscription and its reconnect policy. Raw payloads
//! leave this module through a bounded channel and are validated elsewhere.

pub mod backoff;
pub mod mqtt;
pub mod state;

pub use mqtt::{IngressHandle, MqttIngress};
pub use state::{IngressEvent, IngressState};
