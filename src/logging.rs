//! Log subscriber setup
//!
//! `RUST_LOG` takes precedence over the configured level when set.

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::EnvFilter;

const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Install the global subscriber. `format` is "text" or "json".
pub fn init_logging(level: &str, format: &str) -> Result<()> {
    let level = level.trim().to_lowercase();
    let (level, known) = if LEVELS.contains(&level.as_str()) {
        (level, true)
    } else {
        ("info".to_string(), false)
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let installed = match format {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
    installed
        .map_err(|e| anyhow!(e))
        .context("Failed to set tracing subscriber")?;

    if !known {
        tracing::warn!(fallback = "info", "Unknown log level, using fallback");
    }
    if !matches!(format, "text" | "json") {
        tracing::warn!(format = %format, "Unknown log format, using text");
    }

    Ok(())
}
