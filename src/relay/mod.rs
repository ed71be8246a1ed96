//! The `relay` module is the fan-out core: payload validation, the
//! subscriber registry and the broadcast engine.

pub mod engine;
pub mod message;
pub mod registry;

pub use engine::{BroadcastEngine, Relay};
pub use message::{TelemetryRecord, ValidationMode};
pub use registry::SubscriberRegistry;
