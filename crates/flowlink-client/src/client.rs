//! Client facade wiring bus, connection manager, streamer, and metrics.
//!
//! Explicitly constructed (no module-level globals): applications build one
//! instance at startup and tear it down at shutdown; tests build as many as
//! they like with injected connectors.

use std::sync::Arc;
use std::time::Duration;

use flowlink_core::error::{FlowlinkError, Result};
use flowlink_core::protocol::envelope::Envelope;

use crate::config::ClientConfig;
use crate::dispatch::{BusEvent, EventBus, HandlerId};
use crate::obs::ClientMetrics;
use crate::stream::{StreamObserver, Streamer};
use crate::transport::{
    ConnectionManager, ConnectionState, Connector, HttpStreamer, ReconnectPolicy, WsConnector,
};

pub struct FlowlinkClient {
    bus: Arc<EventBus>,
    manager: Arc<ConnectionManager>,
    streamer: Streamer,
    metrics: Arc<ClientMetrics>,
}

impl FlowlinkClient {
    /// Build a client with the production WebSocket dialer.
    pub fn new(cfg: ClientConfig) -> Result<Self> {
        let connector = Arc::new(WsConnector::new(cfg.server.ws_url()));
        Self::with_connector(cfg, connector)
    }

    /// Build a client with an injected dialer (used by tests).
    pub fn with_connector(cfg: ClientConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        let bus = Arc::new(EventBus::new());
        let metrics = Arc::new(ClientMetrics::default());

        let policy = ReconnectPolicy {
            max_attempts: cfg.reconnect.max_attempts,
            base_delay: Duration::from_millis(cfg.reconnect.base_delay_ms),
            max_delay: Duration::from_millis(cfg.reconnect.max_delay_ms),
        };
        let manager = Arc::new(ConnectionManager::new(
            connector,
            Arc::clone(&bus),
            Arc::clone(&metrics),
            policy,
        ));

        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| FlowlinkError::Internal(format!("http client build failed: {e}")))?;
        let streamer = Streamer::new(
            Arc::clone(&manager),
            Arc::clone(&bus),
            HttpStreamer::new(http_client, cfg.server.http_url.clone()),
            Arc::clone(&metrics),
            Duration::from_millis(cfg.stream.request_timeout_ms),
        );

        Ok(Self {
            bus,
            manager,
            streamer,
            metrics,
        })
    }

    /// Establish the socket transport. Streaming works without it (chunked
    /// HTTP); connecting enables the correlated socket path and `send`.
    pub async fn connect(&self, client_id: Option<&str>) -> Result<()> {
        self.manager.connect(client_id).await
    }

    /// Tear down the socket; terminal until the next `connect`.
    pub fn disconnect(&self) {
        self.manager.disconnect();
    }

    /// Fire-and-forget envelope send; buffered while offline.
    pub fn send(&self, env: Envelope) {
        self.manager.send(env);
    }

    /// Subscribe to a channel (`chat`, `mcp`, `system`, `error`,
    /// `connection`).
    pub fn on<F>(&self, channel: &str, handler: F) -> HandlerId
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        self.bus.on(channel, handler)
    }

    /// Unsubscribe a previous `on` registration.
    pub fn off(&self, channel: &str, id: HandlerId) -> bool {
        self.bus.off(channel, id)
    }

    /// Request a streamed response; see [`Streamer::stream_response`].
    pub async fn stream_response(
        &self,
        session_id: &str,
        text: &str,
        observer: Arc<dyn StreamObserver>,
    ) {
        self.streamer.stream_response(session_id, text, observer).await;
    }

    /// Cancel the active stream, if any.
    pub fn abort(&self) {
        self.streamer.abort();
    }

    pub fn is_streaming(&self) -> bool {
        self.streamer.is_streaming()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Envelopes currently buffered while offline.
    pub fn queued(&self) -> usize {
        self.manager.queued()
    }

    pub fn metrics(&self) -> &ClientMetrics {
        &self.metrics
    }

    /// Prometheus text rendering of the client metrics.
    pub fn metrics_render(&self) -> String {
        self.metrics.render()
    }
}
