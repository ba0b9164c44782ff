//! Socket lane envelope (JSON).
//!
//! The unit exchanged over the WebSocket transport. `data` is stored as
//! `RawValue` to enable lazy parsing by consumers: the connection manager
//! routes on `type` alone and never touches the payload.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::{FlowlinkError, Result};

/// Envelope kind discriminator (field name is `type` in JSON).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    Chat,
    Mcp,
    System,
    Error,
}

impl EnvelopeKind {
    /// Channel name this kind is dispatched on.
    pub fn as_str(self) -> &'static str {
        match self {
            EnvelopeKind::Chat => "chat",
            EnvelopeKind::Mcp => "mcp",
            EnvelopeKind::System => "system",
            EnvelopeKind::Error => "error",
        }
    }
}

/// Socket lane envelope.
///
/// Inbound parsing is tolerant: unknown fields are ignored and `timestamp`
/// defaults to zero, since the server is an external collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Message kind (field name is `type` in JSON).
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// Optional payload, stored as raw JSON (lazy parsing).
    #[serde(default)]
    pub data: Option<Box<RawValue>>,
    /// Sender-side epoch milliseconds.
    #[serde(default)]
    pub timestamp: u64,
    /// Optional correlation id linking a response to its request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Envelope {
    /// Build an outbound envelope, serializing `data` once at emit time.
    pub fn new<T: Serialize>(kind: EnvelopeKind, data: &T) -> Result<Self> {
        let raw = serde_json::value::to_raw_value(data)
            .map_err(|e| FlowlinkError::Internal(format!("payload encode failed: {e}")))?;
        Ok(Self {
            kind,
            data: Some(raw),
            timestamp: epoch_ms(),
            id: None,
        })
    }

    /// Attach a correlation id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Current time as epoch milliseconds. Zero if the clock is before the epoch.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Generate a correlation id: `<kind>_<epochMs>_<random>`.
///
/// The time component keeps ids monotonically distinguishable within a
/// session; the 9-char alphanumeric suffix makes them unguessable enough to
/// avoid collision between requests issued in the same millisecond.
pub fn correlation_id(kind: EnvelopeKind) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect();
    format!("{}_{}_{}", kind.as_str(), epoch_ms(), suffix)
}
