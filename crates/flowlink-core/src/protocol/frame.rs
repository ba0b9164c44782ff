//! Stream lane frame (JSON payload of a `data:` line).
//!
//! One decoded unit of an incrementally generated response, on either
//! transport: chunked-HTTP bodies carry these directly, socket responses
//! carry them in the envelope `data` field.

use serde::{Deserialize, Serialize};

/// Frame kind discriminator (field name is `type` in JSON).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    /// Incremental content; consumers concatenate in arrival order.
    Chunk,
    /// Terminal: generation finished, no further chunks follow.
    Complete,
    /// Terminal: generation failed, `content` carries the message.
    Error,
}

/// One streaming frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamFrame {
    #[serde(rename = "type")]
    pub kind: FrameKind,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl StreamFrame {
    /// True for `complete` and `error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, FrameKind::Complete | FrameKind::Error)
    }
}
