//! Protocol modules (socket envelope + chunked streaming frames).
//!
//! This module hosts the two wire formats the client speaks:
//! - Socket lane: JSON envelopes with optional RawValue payloads and
//!   correlation ids.
//! - Stream lane: `data: <json>` frames separated by blank lines, decoded
//!   incrementally by [`decoder::ChunkDecoder`].
//!
//! All parsers are panic-free: malformed input is logged or reported as
//! `FlowlinkError` instead of panicking, keeping the client resilient to a
//! misbehaving server.

pub mod decoder;
pub mod envelope;
pub mod frame;
