//! The `client` module defines the representation of a subscriber in the relay.
//!
//! A subscriber is one accepted WebSocket connection. The transport layer owns
//! the socket; what the rest of the relay sees is a [`Subscriber`]: an
//! identifier, the sending half of the connection's outbound queue, and a
//! shared [`Liveness`] flag the connection task keeps up to date.

pub mod pubsub_client;
pub use pubsub_client::{Liveness, LivenessState, Subscriber, SubscriberHandle, SubscriberId};
