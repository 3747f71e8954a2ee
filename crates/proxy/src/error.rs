//! Error types for proxy

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid target '{url}': {reason}")]
    InvalidTarget { url: String, reason: String },

    #[error("No upstream target configured")]
    NoTarget,

    #[error("Upstream error: {0}")]
    UpstreamError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProxyError>;
