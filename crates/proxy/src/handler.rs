//! Per-request pipeline: buffer, rewrite, forward

use crate::body::{full, BoxError, ProxyBody};
use crate::forwarder::Forwarder;
use crate::request_id;
use bytes::Bytes;
use config::DebugConfig;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Body;
use rules::RuleEngine;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Longest body excerpt written to debug logs
const MAX_LOGGED_BODY: usize = 1000;

enum BodyError {
    TooLarge,
    Read(BoxError),
}

/// Handles each inbound request: rewrites the body with the rule engine
/// and forwards it upstream.
pub struct ProxyHandler {
    engine: Arc<RuleEngine>,
    forwarder: Arc<Forwarder>,
    max_body_size: usize,
    health_path: Option<String>,
    health_timeout: Duration,
    debug: DebugConfig,
}

impl ProxyHandler {
    pub fn new(engine: Arc<RuleEngine>, forwarder: Arc<Forwarder>) -> Self {
        Self {
            engine,
            forwarder,
            max_body_size: 0,
            health_path: None,
            health_timeout: Duration::from_secs(5),
            debug: DebugConfig::default(),
        }
    }

    /// Reject bodies larger than `limit` bytes with 413. Zero disables the limit.
    pub fn with_max_body_size(mut self, limit: usize) -> Self {
        self.max_body_size = limit;
        self
    }

    /// Answer `path` locally with a health report
    pub fn with_health_path(mut self, path: Option<String>, probe_timeout: Duration) -> Self {
        self.health_path = path;
        self.health_timeout = probe_timeout;
        self
    }

    pub fn with_debug(mut self, debug: DebugConfig) -> Self {
        self.debug = debug;
        self
    }

    pub async fn handle<B>(&self, req: Request<B>) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        let start = Instant::now();
        let request_id = request_id::generate();
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        info!(request_id = %request_id, method = %method, path = %path, "Request started");

        if method == Method::GET && self.health_path.as_deref() == Some(path.as_str()) {
            return self.health_report().await;
        }

        let (parts, body) = req.into_parts();

        let body = match self.read_body(body).await {
            Ok(body) => body,
            Err(BodyError::TooLarge) => {
                warn!(request_id = %request_id, limit = self.max_body_size, "Request body too large");
                return error_response(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large");
            }
            Err(BodyError::Read(e)) => {
                error!(request_id = %request_id, error = %e, "Failed to read request body");
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read request body");
            }
        };

        let body = match self.transform(&request_id, body) {
            Ok(body) => body,
            Err(e) => {
                error!(request_id = %request_id, error = %e, "Content rewrite failed");
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Content rewrite failed");
            }
        };

        let upstream = match self.forwarder.forward_request(&parts, body).await {
            Ok(response) => response,
            Err(e) => {
                error!(request_id = %request_id, error = %e, "Forwarding failed");
                return error_response(StatusCode::BAD_GATEWAY, "Bad gateway");
            }
        };

        let response = Forwarder::copy_response(upstream);
        info!(
            request_id = %request_id,
            status = response.status().as_u16(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Request completed"
        );
        response
    }

    async fn read_body<B>(&self, body: B) -> Result<Bytes, BodyError>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        let collected = if self.max_body_size == 0 {
            body.collect().await.map_err(|e| BodyError::Read(e.into()))?
        } else {
            Limited::new(body, self.max_body_size)
                .collect()
                .await
                .map_err(|e| {
                    if e.downcast_ref::<LengthLimitError>().is_some() {
                        BodyError::TooLarge
                    } else {
                        BodyError::Read(e)
                    }
                })?
        };
        Ok(collected.to_bytes())
    }

    // Bodies are rewritten as raw bytes; only empty bodies skip the engine
    fn transform(&self, request_id: &str, body: Bytes) -> rules::Result<Bytes> {
        if body.is_empty() {
            return Ok(body);
        }

        if self.debug.should_show_original() {
            debug!(request_id = %request_id, body = %truncate(&body), "Original body");
        }

        let rewritten = self.engine.process(&body)?;

        if self.debug.should_show_modified() {
            debug!(request_id = %request_id, body = %truncate(&rewritten), "Modified body");
        }
        if rewritten[..] != body[..] {
            debug!(
                request_id = %request_id,
                before = body.len(),
                after = rewritten.len(),
                "Body rewritten"
            );
        }

        Ok(Bytes::from(rewritten))
    }

    async fn health_report(&self) -> Response<ProxyBody> {
        let target_healthy = self.forwarder.is_healthy(self.health_timeout).await;
        let stats = self.engine.stats();

        let report = json!({
            "status": if target_healthy { "healthy" } else { "degraded" },
            "target": {
                "url": self.forwarder.primary_target().to_string(),
                "mode": self.forwarder.mode(),
                "status": if target_healthy { "healthy" } else { "unhealthy" },
            },
            "engine": if stats.enabled == 0 { "no_rules_enabled" } else { "healthy" },
            "rules": stats,
        });

        let status = if target_healthy {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };

        let mut response = Response::new(full(report.to_string()));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }
}

fn error_response(status: StatusCode, message: &'static str) -> Response<ProxyBody> {
    let mut response = Response::new(full(message));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

// Lossy UTF-8 view of a body, cut to MAX_LOGGED_BODY characters
fn truncate(body: &[u8]) -> String {
    let s = String::from_utf8_lossy(body);
    match s.char_indices().nth(MAX_LOGGED_BODY) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
