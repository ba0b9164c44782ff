//! Event bus module exports.
//!
//! Re-exports the bus and the well-known channel names so downstream
//! consumers can depend on this module directly.

pub mod bus;

pub use bus::{BusEvent, EventBus, HandlerId};

/// Well-known channel names. Channels are matched by exact value only.
pub mod channel {
    /// Correlated chat responses.
    pub const CHAT: &str = "chat";
    /// Tool/MCP traffic.
    pub const MCP: &str = "mcp";
    /// Server housekeeping messages.
    pub const SYSTEM: &str = "system";
    /// Non-recovered transport faults and server error envelopes.
    pub const ERROR: &str = "error";
    /// Connection state transitions.
    pub const CONNECTION: &str = "connection";
}
