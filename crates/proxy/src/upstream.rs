//! Upstream targets and round-robin selection

use crate::error::{ProxyError, Result};
use parking_lot::Mutex;
use reqwest::Url;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// An upstream base URL: scheme and authority only
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    base: Url,
}

impl Target {
    /// Parse a target URL. Any path, query or fragment is dropped.
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = |reason: &str| ProxyError::InvalidTarget {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty URL"));
        }

        let mut base = Url::parse(trimmed).map_err(|e| invalid(&e.to_string()))?;

        if !matches!(base.scheme(), "http" | "https") {
            return Err(invalid("scheme must be http or https"));
        }
        if base.host_str().map_or(true, str::is_empty) {
            return Err(invalid("missing host"));
        }

        base.set_path("");
        base.set_query(None);
        base.set_fragment(None);

        Ok(Self { base })
    }

    /// Outbound URL for an inbound path and optional query
    pub fn join(&self, path: &str, query: Option<&str>) -> Url {
        let mut url = self.base.clone();
        if path.starts_with('/') {
            url.set_path(path);
        } else {
            url.set_path(&format!("/{}", path));
        }
        url.set_query(query.filter(|q| !q.is_empty()));
        url
    }

    pub fn url(&self) -> &Url {
        &self.base
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.base.as_str().trim_end_matches('/'))
    }
}

/// Round-robin over a fixed, non-empty target list
#[derive(Debug)]
pub struct LoadBalancer {
    targets: Vec<Arc<Target>>,
    cursor: Mutex<usize>,
}

impl LoadBalancer {
    pub fn new(targets: Vec<Target>) -> Result<Self> {
        if targets.is_empty() {
            return Err(ProxyError::NoTarget);
        }

        Ok(Self {
            targets: targets.into_iter().map(Arc::new).collect(),
            cursor: Mutex::new(0),
        })
    }

    pub fn from_urls<S: AsRef<str>>(urls: &[S]) -> Result<Self> {
        let targets = urls
            .iter()
            .map(|u| Target::parse(u.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Self::new(targets)
    }

    /// Next target in configured order, wrapping around
    pub fn next(&self) -> Arc<Target> {
        let idx = {
            let mut cursor = self.cursor.lock();
            let idx = *cursor;
            *cursor = (idx + 1) % self.targets.len();
            idx
        };

        let target = Arc::clone(&self.targets[idx]);
        debug!(upstream = %target, index = idx, "Selected upstream");
        target
    }

    pub fn targets(&self) -> &[Arc<Target>] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
