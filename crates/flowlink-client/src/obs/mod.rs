//! Lightweight in-process metrics (dependency-free).
//!
//! Counters and gauges stored as atomics, rendered in Prometheus text
//! format through the client facade. No exporter crate is pulled in.

pub mod metrics;

pub use metrics::ClientMetrics;
