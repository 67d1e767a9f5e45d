//! Reverse proxy implementation
//!
//! This module provides the relay functionality including:
//! - Response capture and replay
//! - Trigger status matching
//! - Shared forward-proxy rotation
//! - Forwarding through HTTP, HTTPS and SOCKS5 proxies
//! - Request dispatch with rotate-and-retry

pub mod buffer;
pub mod egress;
pub mod handler;
pub mod rewrite;
pub mod rotation;
pub mod server;
pub mod transport;
pub mod trigger;

#[cfg(test)]
pub(crate) mod testing;

pub use buffer::{ClientResponse, ResponseBuffer, ResponseSink};
pub use handler::{ProxyHandler, ProxyHandlerConfig};
pub use rotation::ProxyRotation;
pub use server::ProxyServer;
pub use transport::ForwardTransport;
pub use trigger::TriggerSet;
