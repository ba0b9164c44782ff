//! Streaming orchestrator: the single entry point consumers use to request
//! an incrementally generated response.
//!
//! Picks a transport once per call (socket when connected, chunked HTTP
//! otherwise), drives the decode/correlation machinery, and guarantees
//! exactly one terminal callback per stream. At most one stream is in
//! flight per orchestrator instance; starting a new one cancels the
//! previous.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use flowlink_core::protocol::decoder::ChunkDecoder;
use flowlink_core::protocol::envelope::{correlation_id, Envelope, EnvelopeKind};
use flowlink_core::protocol::frame::{FrameKind, StreamFrame};

use crate::dispatch::{channel, BusEvent, EventBus, HandlerId};
use crate::obs::ClientMetrics;
use crate::transport::{lock, ConnectionManager, ConnectionState, HttpStreamer};

/// Per-call transport decision, made once and never re-evaluated mid-stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportChoice {
    Socket,
    ChunkedHttp,
}

impl TransportChoice {
    fn label(self) -> &'static str {
        match self {
            TransportChoice::Socket => "socket",
            TransportChoice::ChunkedHttp => "http",
        }
    }
}

/// Consumer callbacks for one stream. `on_chunk` deltas arrive in order;
/// exactly one of `on_complete`/`on_error` fires, unless the stream is
/// aborted first.
pub trait StreamObserver: Send + Sync {
    fn on_chunk(&self, delta: &str);
    fn on_complete(&self, full_text: &str);
    fn on_error(&self, message: &str);
}

#[derive(Debug, Serialize)]
struct ChatSend<'a> {
    content: &'a str,
    conversation_id: &'a str,
}

/// Message fed to the socket-path pump by the bus subscriptions.
enum SocketMsg {
    Frame(StreamFrame),
    /// Connection dropped under the stream; no terminal frame will come.
    Lost,
}

pub struct Streamer {
    manager: Arc<ConnectionManager>,
    bus: Arc<EventBus>,
    http: HttpStreamer,
    metrics: Arc<ClientMetrics>,
    request_timeout: Duration,
    streaming: Arc<AtomicBool>,
    active: Mutex<Option<ActiveStream>>,
}

struct ActiveStream {
    terminated: Arc<AtomicBool>,
    subscriptions: Vec<(&'static str, HandlerId)>,
    task: JoinHandle<()>,
    label: &'static str,
}

/// Shared terminal-state guard: whichever of completion, error, timeout, or
/// abort claims it first wins; everything after is suppressed.
struct Terminal {
    terminated: Arc<AtomicBool>,
    streaming: Arc<AtomicBool>,
    bus: Arc<EventBus>,
    subscriptions: Vec<(&'static str, HandlerId)>,
    observer: Arc<dyn StreamObserver>,
    metrics: Arc<ClientMetrics>,
    label: &'static str,
}

impl Terminal {
    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Claim the terminal slot; detaches subscriptions so stale late events
    /// are silently ignored. False if already claimed (e.g. by `abort`).
    fn claim(&self) -> bool {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return false;
        }
        for (ch, id) in &self.subscriptions {
            self.bus.off(ch, *id);
        }
        self.streaming.store(false, Ordering::SeqCst);
        true
    }

    fn complete(&self, full_text: &str) {
        if self.claim() {
            self.metrics
                .streams
                .inc(&[("transport", self.label), ("outcome", "completed")]);
            self.observer.on_complete(full_text);
        }
    }

    fn error(&self, message: &str) {
        if self.claim() {
            self.metrics
                .streams
                .inc(&[("transport", self.label), ("outcome", "failed")]);
            tracing::debug!(message, "stream failed");
            self.observer.on_error(message);
        }
    }

    fn chunk(&self, delta: &str) {
        if !self.is_terminated() {
            self.observer.on_chunk(delta);
        }
    }
}

impl Streamer {
    pub fn new(
        manager: Arc<ConnectionManager>,
        bus: Arc<EventBus>,
        http: HttpStreamer,
        metrics: Arc<ClientMetrics>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            manager,
            bus,
            http,
            metrics,
            request_timeout,
            streaming: Arc::new(AtomicBool::new(false)),
            active: Mutex::new(None),
        }
    }

    /// Request a streamed response. Failures surface through the observer's
    /// `on_error` only; this call itself never fails.
    pub async fn stream_response(
        &self,
        session_id: &str,
        text: &str,
        observer: Arc<dyn StreamObserver>,
    ) {
        // At most one in-flight stream per instance.
        self.abort();
        self.streaming.store(true, Ordering::SeqCst);

        let choice = if self.manager.state() == ConnectionState::Connected {
            TransportChoice::Socket
        } else {
            TransportChoice::ChunkedHttp
        };
        tracing::debug!(choice = choice.label(), conversation = session_id, "starting stream");
        self.metrics
            .streams
            .inc(&[("transport", choice.label()), ("outcome", "started")]);

        let active = match choice {
            TransportChoice::Socket => self.start_socket(session_id, text, observer),
            TransportChoice::ChunkedHttp => self.start_http(session_id, text, observer),
        };
        *lock(&self.active) = Some(active);
    }

    /// Cancel the active stream, if any. Neither terminal callback fires for
    /// an aborted stream; the connection itself is left untouched. Safe to
    /// call repeatedly.
    pub fn abort(&self) {
        let Some(active) = lock(&self.active).take() else {
            return;
        };
        active.terminated.store(true, Ordering::SeqCst);
        for (ch, id) in &active.subscriptions {
            self.bus.off(ch, *id);
        }
        active.task.abort();
        if self.streaming.swap(false, Ordering::SeqCst) {
            self.metrics
                .streams
                .inc(&[("transport", active.label), ("outcome", "aborted")]);
        }
    }

    /// True from `stream_response` entry until its terminal callback or
    /// `abort`.
    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    fn start_socket(
        &self,
        session_id: &str,
        text: &str,
        observer: Arc<dyn StreamObserver>,
    ) -> ActiveStream {
        let corr = correlation_id(EnvelopeKind::Chat);
        let (tx, mut rx) = mpsc::unbounded_channel::<SocketMsg>();

        // Subscribe before sending so an instant response cannot be missed.
        let filter_id = corr.clone();
        let frame_tx = tx.clone();
        let chat_sub = self.bus.on(channel::CHAT, move |ev| {
            let BusEvent::Message(env) = ev else { return };
            if env.id.as_deref() != Some(filter_id.as_str()) {
                return;
            }
            let Some(data) = env.data.as_ref() else { return };
            match serde_json::from_str::<StreamFrame>(data.get()) {
                Ok(frame) => {
                    let _ = frame_tx.send(SocketMsg::Frame(frame));
                }
                Err(e) => tracing::warn!(%e, "correlated response carried an undecodable frame"),
            }
        });

        // The socket never delivers a terminal frame if it drops mid-stream;
        // watch the state channel so that case synthesizes an error.
        let lost_tx = tx;
        let conn_sub = self.bus.on(channel::CONNECTION, move |ev| {
            if matches!(
                ev,
                BusEvent::State(ConnectionState::Disconnected | ConnectionState::Connecting)
            ) {
                let _ = lost_tx.send(SocketMsg::Lost);
            }
        });

        let subscriptions = vec![(channel::CHAT, chat_sub), (channel::CONNECTION, conn_sub)];
        let terminated = Arc::new(AtomicBool::new(false));
        let terminal = Terminal {
            terminated: Arc::clone(&terminated),
            streaming: Arc::clone(&self.streaming),
            bus: Arc::clone(&self.bus),
            subscriptions: subscriptions.clone(),
            observer,
            metrics: Arc::clone(&self.metrics),
            label: TransportChoice::Socket.label(),
        };

        let manager = Arc::clone(&self.manager);
        let deadline = self.request_timeout;
        let session = session_id.to_string();
        let prompt = text.to_string();

        let task = tokio::spawn(async move {
            let payload = ChatSend {
                content: &prompt,
                conversation_id: &session,
            };
            match Envelope::new(EnvelopeKind::Chat, &payload) {
                Ok(env) => manager.send(env.with_id(corr)),
                Err(e) => {
                    terminal.error(&format!("request encode failed: {e}"));
                    return;
                }
            }

            let mut acc = String::new();
            loop {
                // Idle deadline: measured to the next matching event, so a
                // long generation stays alive as long as chunks keep coming.
                match tokio::time::timeout(deadline, rx.recv()).await {
                    Err(_) => {
                        terminal.error("response timed out");
                        return;
                    }
                    Ok(None) | Ok(Some(SocketMsg::Lost)) => {
                        terminal.error("connection lost before completion");
                        return;
                    }
                    Ok(Some(SocketMsg::Frame(frame))) => match frame.kind {
                        FrameKind::Chunk => {
                            acc.push_str(&frame.content);
                            terminal.chunk(&frame.content);
                        }
                        FrameKind::Complete => {
                            terminal.complete(&acc);
                            return;
                        }
                        FrameKind::Error => {
                            terminal.error(&frame.content);
                            return;
                        }
                    },
                }
            }
        });

        ActiveStream {
            terminated,
            subscriptions,
            task,
            label: TransportChoice::Socket.label(),
        }
    }

    fn start_http(
        &self,
        session_id: &str,
        text: &str,
        observer: Arc<dyn StreamObserver>,
    ) -> ActiveStream {
        let terminated = Arc::new(AtomicBool::new(false));
        let terminal = Terminal {
            terminated: Arc::clone(&terminated),
            streaming: Arc::clone(&self.streaming),
            bus: Arc::clone(&self.bus),
            subscriptions: Vec::new(),
            observer,
            metrics: Arc::clone(&self.metrics),
            label: TransportChoice::ChunkedHttp.label(),
        };

        let http = self.http.clone();
        let session = session_id.to_string();
        let prompt = text.to_string();

        let task = tokio::spawn(async move {
            let mut body = match http.open(&session, &prompt).await {
                Ok(b) => b,
                Err(e) => {
                    terminal.error(&e.to_string());
                    return;
                }
            };

            let mut dec = ChunkDecoder::new();
            let mut acc = String::new();
            while let Some(next) = body.next().await {
                let bytes = match next {
                    Ok(b) => b,
                    Err(e) => {
                        terminal.error(&format!("stream read failed: {e}"));
                        return;
                    }
                };
                for frame in dec.feed(&bytes) {
                    match frame.kind {
                        FrameKind::Chunk => {
                            acc.push_str(&frame.content);
                            terminal.chunk(&frame.content);
                        }
                        FrameKind::Complete => {
                            terminal.complete(&acc);
                            return;
                        }
                        FrameKind::Error => {
                            terminal.error(&frame.content);
                            return;
                        }
                    }
                }
            }
            dec.close();
            // Body ended without a terminal frame; synthesize one so the
            // exactly-one-terminal invariant holds.
            terminal.error("stream ended without completion");
        });

        ActiveStream {
            terminated,
            subscriptions: Vec::new(),
            task,
            label: TransportChoice::ChunkedHttp.label(),
        }
    }
}
