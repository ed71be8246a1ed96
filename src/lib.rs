//! # gpsrelay
//!
//! `gpsrelay` bridges an MQTT topic carrying GPS telemetry to any number of
//! WebSocket subscribers. Every message received on the topic is validated
//! and fanned out to every connected subscriber; a slow or closed subscriber
//! is dropped without holding up the others.
//!
//! ## Core Modules
//!
//! - `relay`: payload validation, the subscriber registry and the broadcast engine.
//! - `client`: the subscriber handle shared by the registry and the transport.
//! - `ingress`: the MQTT connection, subscription and reconnect logic.
//! - `transport`: the WebSocket listener and per-connection tasks.
//! - `config`: loading and merging configuration.
//! - `app`: wiring everything together and shutting it down.
//! - `utils`: error types and logging.

pub mod app;
pub mod client;
pub mod config;
pub mod ingress;
pub mod relay;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod tests;
