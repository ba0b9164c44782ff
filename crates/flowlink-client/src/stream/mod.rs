//! Streaming orchestrator module exports.

pub mod orchestrator;

pub use orchestrator::{StreamObserver, Streamer, TransportChoice};
