//! The `error` module defines the error types used within `gpsrelay`.
//!
//! Every failure the relay can hit has a home here, grouped by the component
//! that produces it. Only [`RelayError`] is fatal; the others are recovered
//! locally by the component that raised them and end up in the log.

use std::io;

use thiserror::Error;

use crate::client::SubscriberId;

/// A raw upstream payload that cannot become a frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("malformed payload: {0}")]
    Parse(String),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` must be a {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },

    #[error("payload is not valid UTF-8")]
    NotUtf8,
}

/// A frame could not be handed to one subscriber.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("subscriber {0} is not open")]
    NotOpen(SubscriberId),

    #[error("outbound queue of subscriber {0} is closed")]
    Closed(SubscriberId),

    #[error("send to subscriber {0} timed out")]
    Timeout(SubscriberId),
}

impl DeliveryError {
    /// The subscriber the failed delivery was addressed to.
    pub fn subscriber(&self) -> &SubscriberId {
        match self {
            DeliveryError::NotOpen(id) | DeliveryError::Closed(id) | DeliveryError::Timeout(id) => id,
        }
    }
}

/// Upstream MQTT failures. Both variants are retried by the ingress adapter.
#[derive(Debug, Error)]
pub enum IngressError {
    #[error("subscription to `{topic}` failed: {reason}")]
    Subscription { topic: String, reason: String },

    #[error("broker connection failed: {0}")]
    Connection(#[from] rumqttc::ConnectionError),
}

/// Startup failures. These terminate the process.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to bind WebSocket listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("listener error: {0}")]
    Listener(#[from] io::Error),
}

impl From<::config::ConfigError> for RelayError {
    fn from(err: ::config::ConfigError) -> Self {
        RelayError::Config(err.to_string())
    }
}
