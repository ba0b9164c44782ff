//! Scripted dialer/transport and recording observer shared by client tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use flowlink_client::config::{self, ClientConfig};
use flowlink_client::stream::StreamObserver;
use flowlink_client::transport::{Connector, Transport};
use flowlink_core::error::{FlowlinkError, Result};

/// One successfully dialed connection, driven by the test.
pub struct MockHandle {
    sent: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    inbound: mpsc::UnboundedSender<Option<String>>,
    write_ok: Arc<AtomicBool>,
}

impl MockHandle {
    /// Next text frame the client wrote, or `None` after 2s.
    pub async fn next_sent(&self) -> Option<String> {
        let mut rx = self.sent.lock().await;
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Deliver a text frame to the client.
    pub fn push(&self, text: &str) {
        let _ = self.inbound.send(Some(text.to_string()));
    }

    /// Simulate a server-initiated close.
    pub fn close_remote(&self) {
        let _ = self.inbound.send(None);
    }

    /// Make every subsequent write on this connection fail.
    pub fn fail_writes(&self) {
        self.write_ok.store(false, Ordering::SeqCst);
    }
}

struct MockTransport {
    sent_tx: mpsc::UnboundedSender<String>,
    in_rx: mpsc::UnboundedReceiver<Option<String>>,
    write_ok: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        if !self.write_ok.load(Ordering::SeqCst) {
            return Err(FlowlinkError::Stream("scripted write failure".into()));
        }
        self.sent_tx.send(text).map_err(|_| FlowlinkError::Closed)
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        match self.in_rx.recv().await {
            Some(Some(text)) => Some(Ok(text)),
            Some(None) | None => None,
        }
    }

    async fn close(&mut self) {}
}

/// Scripted dialer: fails the next N dials, or every dial.
pub struct MockConnector {
    fail_next: AtomicU32,
    always_fail: AtomicBool,
    dial_delay_ms: AtomicU64,
    dials: AtomicU32,
    handles: Mutex<Vec<Arc<MockHandle>>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail_next: AtomicU32::new(0),
            always_fail: AtomicBool::new(false),
            dial_delay_ms: AtomicU64::new(0),
            dials: AtomicU32::new(0),
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Make every dial take this long before resolving.
    pub fn set_dial_delay(&self, ms: u64) {
        self.dial_delay_ms.store(ms, Ordering::SeqCst);
    }

    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn set_always_fail(&self, v: bool) {
        self.always_fail.store(v, Ordering::SeqCst);
    }

    pub fn dial_count(&self) -> u32 {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn connection_count(&self) -> usize {
        self.handles.lock().unwrap().len()
    }

    /// Handle for the most recent successful dial.
    pub fn latest(&self) -> Option<Arc<MockHandle>> {
        self.handles.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _client_id: &str) -> Result<Box<dyn Transport>> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let delay = self.dial_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.always_fail.load(Ordering::SeqCst) {
            return Err(FlowlinkError::ConnectFailed("scripted failure".into()));
        }
        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(FlowlinkError::ConnectFailed("scripted failure".into()));
        }

        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let write_ok = Arc::new(AtomicBool::new(true));
        self.handles.lock().unwrap().push(Arc::new(MockHandle {
            sent: tokio::sync::Mutex::new(sent_rx),
            inbound: in_tx,
            write_ok: Arc::clone(&write_ok),
        }));
        Ok(Box::new(MockTransport {
            sent_tx,
            in_rx,
            write_ok,
        }))
    }
}

/// Observer that records callbacks and wakes waiters on a terminal one.
#[derive(Default)]
pub struct RecordingObserver {
    pub chunks: Mutex<Vec<String>>,
    pub completed: Mutex<Vec<String>>,
    pub errors: Mutex<Vec<String>>,
    notify: Notify,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn terminal_count(&self) -> usize {
        self.completed.lock().unwrap().len() + self.errors.lock().unwrap().len()
    }

    /// Wait up to `ms` for a terminal callback.
    pub async fn wait_terminal(&self, ms: u64) -> bool {
        if self.terminal_count() > 0 {
            return true;
        }
        tokio::time::timeout(Duration::from_millis(ms), self.notify.notified())
            .await
            .is_ok()
    }
}

impl StreamObserver for RecordingObserver {
    fn on_chunk(&self, delta: &str) {
        self.chunks.lock().unwrap().push(delta.to_string());
    }

    fn on_complete(&self, full_text: &str) {
        self.completed.lock().unwrap().push(full_text.to_string());
        self.notify.notify_one();
    }

    fn on_error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
        self.notify.notify_one();
    }
}

/// Config with test-friendly timings.
pub fn test_config(attempts: u32, base_ms: u64, max_ms: u64, timeout_ms: u64) -> ClientConfig {
    config::load_from_str(&format!(
        r#"
version: 1
server:
  http_url: "http://127.0.0.1:9"
reconnect:
  max_attempts: {attempts}
  base_delay_ms: {base_ms}
  max_delay_ms: {max_ms}
stream:
  request_timeout_ms: {timeout_ms}
"#
    ))
    .unwrap()
}

/// Poll `cond` until true or `ms` elapsed.
pub async fn wait_for(cond: impl Fn() -> bool, ms: u64) -> bool {
    let deadline = Instant::now() + Duration::from_millis(ms);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
