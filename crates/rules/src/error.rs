//! Error types for rules

use config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("Failed to load rules: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },

    #[error("Rule #{index}: {source}")]
    RuleSet {
        index: usize,
        #[source]
        source: Box<RulesError>,
    },

    #[error("Rule not found: {0}")]
    RuleNotFound(String),

    #[error("Rule engine stopped")]
    Stopped,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),
}

pub type Result<T> = std::result::Result<T, RulesError>;
