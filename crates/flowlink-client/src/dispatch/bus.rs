//! In-process publish/subscribe registry.
//!
//! Decouples the transport layer (producer of inbound events) from
//! consumers (UI code, the streaming orchestrator). Channels are named by
//! string; each holds an ordered list of subscribers invoked synchronously
//! in registration order. A failing subscriber never affects the others or
//! the emitter.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use flowlink_core::error::ErrorCode;
use flowlink_core::protocol::envelope::Envelope;

use crate::transport::ConnectionState;

/// Event delivered to subscribers.
#[derive(Debug, Clone)]
pub enum BusEvent {
    /// Inbound socket envelope, routed on the channel named by its kind.
    Message(Envelope),
    /// Connection state transition (on the `connection` channel).
    State(ConnectionState),
    /// Non-recovered client-side fault (on the `error` channel).
    Fault { code: ErrorCode, message: String },
}

/// Token identifying one registration; closures have no usable reference
/// equality in Rust, so removal goes through this instead.
pub type HandlerId = u64;

type Handler = Arc<dyn Fn(&BusEvent) + Send + Sync>;

/// Registry and dispatcher for subscriber callbacks.
#[derive(Default)]
pub struct EventBus {
    channels: DashMap<String, Vec<(HandlerId, Handler)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` on `channel`; returns the removal token.
    ///
    /// Registering the same closure twice appends a second invocation; no
    /// de-duplication is performed.
    pub fn on<F>(&self, channel: &str, handler: F) -> HandlerId
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.channels
            .entry(channel.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove the registration `id` from `channel`. Returns whether anything
    /// was removed; unknown ids are a no-op.
    pub fn off(&self, channel: &str, id: HandlerId) -> bool {
        let Some(mut entry) = self.channels.get_mut(channel) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|(hid, _)| *hid != id);
        before != entry.len()
    }

    /// Invoke every subscriber currently registered on `channel`, in
    /// registration order, synchronously on the calling context.
    ///
    /// A panicking subscriber is caught and logged so the remaining
    /// subscribers still run and the emitter never observes the failure.
    pub fn emit(&self, channel: &str, event: &BusEvent) {
        // Snapshot outside the map so subscribers may call on/off reentrantly.
        let handlers: Vec<Handler> = match self.channels.get(channel) {
            Some(entry) => entry.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return,
        };

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::error!(channel, "subscriber panicked; continuing with the rest");
            }
        }
    }

    /// Number of subscribers currently registered on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map(|v| v.len()).unwrap_or(0)
    }
}
