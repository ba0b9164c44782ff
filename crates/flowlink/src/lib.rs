//! Top-level facade crate for flowlink.
//!
//! Re-exports core types and the client library so users can depend on a single crate.

pub mod core {
    pub use flowlink_core::*;
}

pub mod client {
    pub use flowlink_client::*;
}
