//! Network layer for Reel
//!
//! Inbound HTTP/1.1 listener with bounded concurrency, and the outbound
//! client used while recording.

mod client;
mod handler;
mod http;

pub use client::UpstreamClient;
pub use handler::{NetworkHandler, ShutdownHandle};
pub use http::HttpHandler;

/// Graceful shutdown timeout
pub const SHUTDOWN_TIMEOUT_MS: u64 = 5000;
