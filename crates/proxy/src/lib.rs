//! content-proxy proxy: forwarding pipeline and HTTP server
//!
//! Inbound requests are fully buffered, rewritten by a
//! [`rules::RuleEngine`] and forwarded to one or more upstream targets.

pub mod body;
pub mod error;
pub mod forwarder;
pub mod handler;
pub mod headers;
pub mod request_id;
pub mod server;
pub mod upstream;

#[cfg(test)]
mod test_support;

pub use body::{BoxError, ProxyBody};
pub use error::*;
pub use forwarder::Forwarder;
pub use handler::ProxyHandler;
pub use server::{shutdown_channel, ProxyServer};
pub use upstream::{LoadBalancer, Target};
