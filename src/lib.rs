//! Rota Relay - Rotating Reverse Proxy
//!
//! Forwards every client request to one fixed target, routing it through one of several
//! upstream forward-proxies.
//!
//! ## Features
//!
//! - Response buffering so a response can be inspected before it reaches the client
//! - Rotation to the next forward-proxy when the target answers with a trigger status
//! - At most one attempt per configured proxy for each client request
//! - HTTP and HTTPS (absolute form and CONNECT) and SOCKS5 forward-proxies
//! - http and https targets

pub mod config;
pub mod error;
pub mod models;
pub mod proxy;

pub use config::Config;
pub use error::{RelayError, Result};
