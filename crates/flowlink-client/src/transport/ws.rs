//! Socket transport lifecycle (connection manager).
//!
//! Responsibilities:
//! - Dial through the injected [`Connector`], decode inbound frames once,
//!   and emit them on the channel named by their envelope kind.
//! - Buffer outbound envelopes while offline and flush FIFO on (re)connect.
//! - Auto-reconnect after a server-initiated close: bounded attempts with a
//!   doubling, capped delay. An explicit `disconnect()` is terminal.
//!
//! State is owned exclusively here; transitions are published on the
//! `connection` channel, and an exhausted retry budget emits exactly one
//! fault on the `error` channel.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use flowlink_core::error::{ErrorCode, FlowlinkError, Result};
use flowlink_core::protocol::envelope::Envelope;

use crate::dispatch::{channel, BusEvent, EventBus};
use crate::obs::ClientMetrics;
use crate::transport::{lock, ConnectionState, Connector, Transport};

const DEFAULT_CLIENT_ID: &str = "desktop";

/// Bounded reconnection policy.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Owns the socket lifecycle and the outbound queue.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    shared: Arc<Shared>,
}

struct Shared {
    bus: Arc<EventBus>,
    metrics: Arc<ClientMetrics>,
    state: Mutex<ConnectionState>,
    /// Serialized envelopes awaiting a connection, FIFO. Unbounded: the
    /// manager promises not to drop sends, so callers own any cap.
    queue: Mutex<VecDeque<String>>,
    writer: Mutex<Option<mpsc::UnboundedSender<String>>>,
    client_closed: AtomicBool,
    client_id: Mutex<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    /// Local `disconnect()`: terminal.
    Client,
    /// Peer closed the stream: reconnect.
    Remote,
    /// Read or write error: reconnect.
    Failed,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        bus: Arc<EventBus>,
        metrics: Arc<ClientMetrics>,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            connector,
            policy,
            shared: Arc::new(Shared {
                bus,
                metrics,
                state: Mutex::new(ConnectionState::Disconnected),
                queue: Mutex::new(VecDeque::new()),
                writer: Mutex::new(None),
                client_closed: AtomicBool::new(false),
                client_id: Mutex::new(DEFAULT_CLIENT_ID.to_string()),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.shared.state)
    }

    /// Envelopes currently buffered while offline.
    pub fn queued(&self) -> usize {
        lock(&self.shared.queue).len()
    }

    /// Establish the socket. On success the writer is installed, the
    /// offline queue flushed, and the state already `Connected` when this
    /// resolves. A failure of this first dial is returned to the caller
    /// directly; reconnection only applies to an established connection
    /// that drops later.
    pub async fn connect(&self, client_id: Option<&str>) -> Result<()> {
        if !begin_connect(&self.shared) {
            return Ok(());
        }
        if let Some(id) = client_id {
            *lock(&self.shared.client_id) = id.to_string();
        }
        self.shared.client_closed.store(false, Ordering::SeqCst);

        let id = lock(&self.shared.client_id).clone();
        let mut transport = match self.connector.connect(&id).await {
            Ok(t) => {
                self.shared.metrics.connects.inc(&[("result", "ok")]);
                t
            }
            Err(e) => {
                self.shared.metrics.connects.inc(&[("result", "err")]);
                set_state(&self.shared, ConnectionState::Disconnected);
                return Err(e);
            }
        };

        // A disconnect() issued while the dial was in flight is terminal;
        // the freshly dialed transport must not come up.
        if self.shared.client_closed.load(Ordering::SeqCst) {
            transport.close().await;
            set_state(&self.shared, ConnectionState::Disconnected);
            return Ok(());
        }

        let (tx, rx) = mpsc::unbounded_channel::<String>();
        install_writer(&self.shared, tx);
        set_state(&self.shared, ConnectionState::Connected);

        tokio::spawn(run_io(
            Arc::clone(&self.shared),
            Arc::clone(&self.connector),
            self.policy,
            transport,
            rx,
        ));
        Ok(())
    }

    /// Client-initiated teardown: terminal, no reconnection. Idempotent.
    pub fn disconnect(&self) {
        self.shared.client_closed.store(true, Ordering::SeqCst);
        // Dropping the writer ends the io task's pump loop.
        *lock(&self.shared.writer) = None;
        set_state(&self.shared, ConnectionState::Disconnected);
    }

    /// Fire-and-forget send: transmits when connected, otherwise buffers
    /// until the next successful connection. Never fails synchronously.
    pub fn send(&self, env: Envelope) {
        let text = match serde_json::to_string(&env) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(%e, "dropping unserializable envelope");
                return;
            }
        };

        // Queue lock held across the writer check so a concurrent flush
        // cannot reorder this send around the buffered backlog.
        let mut q = lock(&self.shared.queue);
        if let Some(tx) = lock(&self.shared.writer).clone() {
            if tx.send(text.clone()).is_ok() {
                self.shared.metrics.outbound_sent.inc(&[("path", "live")]);
                return;
            }
            // io task raced away between state flips; keep the envelope
        }
        q.push_back(text);
        self.shared.metrics.outbound_queued.inc(&[]);
    }
}

fn set_state(shared: &Shared, next: ConnectionState) {
    let prev = {
        let mut st = lock(&shared.state);
        let prev = *st;
        *st = next;
        prev
    };
    announce(shared, prev, next);
}

/// Atomically claim the `Disconnected -> Connecting` transition; false when
/// another caller already owns the lifecycle. Check and set share one guard
/// so two concurrent `connect()` calls cannot both dial.
fn begin_connect(shared: &Shared) -> bool {
    {
        let mut st = lock(&shared.state);
        if *st != ConnectionState::Disconnected {
            return false;
        }
        *st = ConnectionState::Connecting;
    }
    announce(shared, ConnectionState::Disconnected, ConnectionState::Connecting);
    true
}

fn announce(shared: &Shared, prev: ConnectionState, next: ConnectionState) {
    if prev == next {
        return;
    }
    if next == ConnectionState::Connected {
        shared.metrics.connection_up.inc(&[]);
    } else if prev == ConnectionState::Connected {
        shared.metrics.connection_up.dec(&[]);
    }
    tracing::debug!(state = next.as_str(), "connection state");
    shared.bus.emit(channel::CONNECTION, &BusEvent::State(next));
}

/// Session task: pump one transport, reconnect on remote loss, stop on
/// client close or an exhausted budget.
async fn run_io(
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    mut transport: Box<dyn Transport>,
    mut rx: mpsc::UnboundedReceiver<String>,
) {
    loop {
        let reason = pump(&shared, transport.as_mut(), &mut rx).await;
        retire_writer(&shared, &mut rx);

        if reason == CloseReason::Client || shared.client_closed.load(Ordering::SeqCst) {
            transport.close().await;
            set_state(&shared, ConnectionState::Disconnected);
            return;
        }

        tracing::info!(reason = ?reason, "socket lost, reconnecting");
        set_state(&shared, ConnectionState::Connecting);
        match redial(&shared, connector.as_ref(), policy).await {
            Some(t) => {
                if shared.client_closed.load(Ordering::SeqCst) {
                    set_state(&shared, ConnectionState::Disconnected);
                    return;
                }
                transport = t;
                let (tx, next_rx) = mpsc::unbounded_channel::<String>();
                rx = next_rx;
                install_writer(&shared, tx);
                set_state(&shared, ConnectionState::Connected);
            }
            None => {
                set_state(&shared, ConnectionState::Disconnected);
                if !shared.client_closed.load(Ordering::SeqCst) {
                    shared.bus.emit(
                        channel::ERROR,
                        &BusEvent::Fault {
                            code: ErrorCode::RetriesExhausted,
                            message: format!(
                                "gave up after {} reconnect attempts",
                                policy.max_attempts
                            ),
                        },
                    );
                }
                return;
            }
        }
    }
}

/// Flush the offline backlog into the fresh writer, preserving FIFO order,
/// then publish the writer. The queue lock spans both steps so a concurrent
/// `send()` cannot slip between them.
fn install_writer(shared: &Shared, tx: mpsc::UnboundedSender<String>) {
    let mut q = lock(&shared.queue);
    while let Some(text) = q.pop_front() {
        // Unbounded channel: send only fails if the receiver is gone, which
        // cannot happen before the pump starts.
        if tx.send(text).is_ok() {
            shared.metrics.outbound_sent.inc(&[("path", "flush")]);
        }
    }
    *lock(&shared.writer) = Some(tx);
}

/// Tear down the writer and move everything the channel accepted but never
/// wrote back into the queue, behind any in-flight text `pump` already
/// requeued. The queue lock spans the teardown so a concurrent `send()`
/// cannot slot in ahead of the backlog.
fn retire_writer(shared: &Shared, rx: &mut mpsc::UnboundedReceiver<String>) {
    let mut q = lock(&shared.queue);
    *lock(&shared.writer) = None;
    while let Ok(text) = rx.try_recv() {
        q.push_back(text);
        shared.metrics.outbound_queued.inc(&[]);
    }
}

async fn pump(
    shared: &Shared,
    transport: &mut dyn Transport,
    rx: &mut mpsc::UnboundedReceiver<String>,
) -> CloseReason {
    loop {
        tokio::select! {
            outgoing = rx.recv() => match outgoing {
                Some(text) => {
                    if let Err(e) = transport.send(text.clone()).await {
                        tracing::warn!(%e, "socket write failed");
                        // Not yet on the wire; deliver after reconnect.
                        lock(&shared.queue).push_front(text);
                        return CloseReason::Failed;
                    }
                }
                // Writer dropped only by an explicit disconnect().
                None => return CloseReason::Client,
            },
            incoming = transport.recv() => match incoming {
                Some(Ok(text)) => route_inbound(shared, &text),
                Some(Err(e)) => {
                    tracing::warn!(%e, "socket read failed");
                    return CloseReason::Failed;
                }
                None => return CloseReason::Remote,
            },
        }
    }
}

/// Decode once, then route on the envelope kind. A malformed frame is
/// logged and counted, never fatal to the session.
fn route_inbound(shared: &Shared, text: &str) {
    match serde_json::from_str::<Envelope>(text) {
        Ok(env) => {
            let ch = env.kind.as_str();
            shared.metrics.inbound_frames.inc(&[("kind", ch)]);
            shared.bus.emit(ch, &BusEvent::Message(env));
        }
        Err(e) => {
            shared.metrics.decode_errors.inc(&[]);
            tracing::warn!(%e, "ignoring undecodable socket frame");
        }
    }
}

async fn redial(
    shared: &Shared,
    connector: &dyn Connector,
    policy: ReconnectPolicy,
) -> Option<Box<dyn Transport>> {
    let client_id = lock(&shared.client_id).clone();
    let mut delay = policy.base_delay;

    for attempt in 1..=policy.max_attempts {
        if shared.client_closed.load(Ordering::SeqCst) {
            return None;
        }
        tokio::time::sleep(delay).await;
        if shared.client_closed.load(Ordering::SeqCst) {
            return None;
        }
        shared.metrics.reconnect_attempts.inc(&[]);
        match connector.connect(&client_id).await {
            Ok(t) => {
                tracing::info!(attempt, "socket reconnected");
                return Some(t);
            }
            Err(e) => {
                tracing::warn!(attempt, %e, "reconnect attempt failed");
                delay = (delay * 2).min(policy.max_delay);
            }
        }
    }
    None
}

// --------------------
// Production dialer (tokio-tungstenite)
// --------------------

/// Dials `<ws_url>/ws/<client_id>`.
pub struct WsConnector {
    ws_url: String,
}

impl WsConnector {
    pub fn new(ws_url: impl Into<String>) -> Self {
        let mut ws_url = ws_url.into();
        while ws_url.ends_with('/') {
            ws_url.pop();
        }
        Self { ws_url }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, client_id: &str) -> Result<Box<dyn Transport>> {
        let url = format!("{}/ws/{}", self.ws_url, client_id);
        tracing::debug!(%url, "dialing socket");
        let (stream, _) = connect_async(&url)
            .await
            .map_err(|e| FlowlinkError::ConnectFailed(format!("websocket dial failed: {e}")))?;
        Ok(Box::new(WsTransport { inner: stream }))
    }
}

struct WsTransport {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        self.inner
            .send(Message::Text(text))
            .await
            .map_err(|e| FlowlinkError::Stream(format!("socket write failed: {e}")))
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.inner.next().await? {
                Ok(Message::Text(s)) => return Some(Ok(s)),
                Ok(Message::Close(_)) => return None,
                // Ping/pong are answered by the library; binary has no
                // meaning on this protocol.
                Ok(_) => continue,
                Err(e) => {
                    return Some(Err(FlowlinkError::Stream(format!(
                        "socket read failed: {e}"
                    ))))
                }
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.inner.close(None).await;
    }
}
