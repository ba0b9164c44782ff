//! flowlink client library entry.
//!
//! This crate wires the config, event bus, connection manager, chunked-HTTP
//! streamer, and streaming orchestrator into a cohesive client stack. It is
//! intended to be consumed through [`client::FlowlinkClient`] by the binary
//! (`main.rs`) and by integration tests.

pub mod client;
pub mod config;
pub mod dispatch;
pub mod obs;
pub mod stream;
pub mod transport;

pub use client::FlowlinkClient;
