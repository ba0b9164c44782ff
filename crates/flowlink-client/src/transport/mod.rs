//! Transport layer (WebSocket + chunked HTTP).
//!
//! Exposes the connection manager, the dial seam (`Connector`/`Transport`
//! traits), and the chunked-HTTP streamer.

pub mod http;
pub mod ws;

use async_trait::async_trait;

use flowlink_core::error::Result;

pub use http::HttpStreamer;
pub use ws::{ConnectionManager, ReconnectPolicy, WsConnector};

/// Socket lifecycle state, owned exclusively by the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

/// An established bidirectional text-frame transport.
#[async_trait]
pub trait Transport: Send {
    /// Write one text frame.
    async fn send(&mut self, text: String) -> Result<()>;
    /// Next inbound text frame; `None` once the peer closed.
    async fn recv(&mut self) -> Option<Result<String>>;
    /// Close the transport; best effort.
    async fn close(&mut self);
}

/// Dials new transports. Injected so tests can script connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, client_id: &str) -> Result<Box<dyn Transport>>;
}

/// Poison-recovering lock: a panicked subscriber must not wedge the client.
pub(crate) fn lock<T>(m: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
