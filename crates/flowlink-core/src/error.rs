//! Shared error type across flowlink crates.

use thiserror::Error;

/// Stable error codes surfaced to subscribers and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Transport could not be established.
    ConnectFailed,
    /// Reconnect attempt budget exhausted.
    RetriesExhausted,
    /// No matching response before the deadline.
    Timeout,
    /// Terminal error reported by a stream.
    Stream,
    /// Malformed wire frame or envelope.
    BadFrame,
    /// Transport closed.
    Closed,
    /// Invalid configuration.
    BadConfig,
    /// Internal client error.
    Internal,
}

impl ErrorCode {
    /// String representation used in emitted events and metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ConnectFailed => "CONNECT_FAILED",
            ErrorCode::RetriesExhausted => "RETRIES_EXHAUSTED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Stream => "STREAM_ERROR",
            ErrorCode::BadFrame => "BAD_FRAME",
            ErrorCode::Closed => "CLOSED",
            ErrorCode::BadConfig => "BAD_CONFIG",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, FlowlinkError>;

/// Unified error type used by core and the client stack.
#[derive(Debug, Error)]
pub enum FlowlinkError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("reconnect attempts exhausted after {attempts} tries")]
    RetriesExhausted { attempts: u32 },
    #[error("timed out after {0} ms")]
    Timeout(u64),
    #[error("stream error: {0}")]
    Stream(String),
    #[error("bad frame: {0}")]
    BadFrame(String),
    #[error("connection closed")]
    Closed,
    #[error("invalid config: {0}")]
    BadConfig(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl FlowlinkError {
    /// Map internal error to a stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            FlowlinkError::ConnectFailed(_) => ErrorCode::ConnectFailed,
            FlowlinkError::RetriesExhausted { .. } => ErrorCode::RetriesExhausted,
            FlowlinkError::Timeout(_) => ErrorCode::Timeout,
            FlowlinkError::Stream(_) => ErrorCode::Stream,
            FlowlinkError::BadFrame(_) => ErrorCode::BadFrame,
            FlowlinkError::Closed => ErrorCode::Closed,
            FlowlinkError::BadConfig(_) => ErrorCode::BadConfig,
            FlowlinkError::Internal(_) => ErrorCode::Internal,
        }
    }
}
