//! The `transport` module is responsible for the subscriber-facing network
//! side of the relay: the WebSocket listener and the per-connection tasks
//! that move frames from a subscriber's outbound queue onto its socket.

pub mod websocket;

pub use websocket::{ConnectionOptions, bind, serve};

#[cfg(test)]
mod tests;
