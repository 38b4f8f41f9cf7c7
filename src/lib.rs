//! netgauge estimates download/upload throughput, latency, jitter and packet
//! loss from real HTTP transfers.
//!
//! The measurement core lives in [`measure`]; [`http`] is the network seam
//! it runs against, and [`results`] is the serializable output.

pub mod display;
pub mod errors;
pub mod http;
pub mod measure;
pub mod measurements;
pub mod netinfo;
pub mod progress;
pub mod results;
pub mod stats;
