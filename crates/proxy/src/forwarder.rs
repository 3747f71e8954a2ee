//! Upstream forwarding

use crate::body::{BoxError, ProxyBody};
use crate::error::{ProxyError, Result};
use crate::headers::{forward_request_headers, forward_response_headers};
use crate::upstream::{LoadBalancer, Target};
use bytes::Bytes;
use config::{LoadBalancingStrategy, TargetConfig};
use futures_util::TryStreamExt;
use http::request::Parts;
use http::Response;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

enum Upstreams {
    Single(Arc<Target>),
    Balanced(LoadBalancer),
}

/// Sends rewritten requests to the configured target(s)
pub struct Forwarder {
    client: reqwest::Client,
    upstreams: Upstreams,
    health_path: String,
}

impl Forwarder {
    pub fn new(config: &TargetConfig) -> Result<Self> {
        if config.strategy != LoadBalancingStrategy::RoundRobin {
            return Err(ProxyError::ConfigError(format!(
                "Unsupported load balancing strategy: {}",
                config.strategy
            )));
        }

        let urls = config.target_urls();
        let upstreams = match urls.as_slice() {
            [] => return Err(ProxyError::NoTarget),
            [url] => Upstreams::Single(Arc::new(Target::parse(url)?)),
            _ => Upstreams::Balanced(LoadBalancer::from_urls(&urls)?),
        };

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ProxyError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        let forwarder = Self {
            client,
            upstreams,
            health_path: config.health_check.path.clone(),
        };

        match &forwarder.upstreams {
            Upstreams::Single(target) => {
                info!(
                    upstream = %target,
                    timeout = ?config.timeout(),
                    "Forwarder initialized (single target)"
                );
            }
            Upstreams::Balanced(lb) => {
                info!(
                    targets = lb.len(),
                    strategy = %config.strategy,
                    timeout = ?config.timeout(),
                    "Forwarder initialized (load balanced)"
                );
                for (i, target) in lb.targets().iter().enumerate() {
                    info!(index = i + 1, upstream = %target, "Upstream target");
                }
            }
        }

        Ok(forwarder)
    }

    /// "single" or "load_balanced"
    pub fn mode(&self) -> &'static str {
        match self.upstreams {
            Upstreams::Single(_) => "single",
            Upstreams::Balanced(_) => "load_balanced",
        }
    }

    /// The fixed target, or the first configured one
    pub fn primary_target(&self) -> Arc<Target> {
        match &self.upstreams {
            Upstreams::Single(target) => Arc::clone(target),
            Upstreams::Balanced(lb) => Arc::clone(&lb.targets()[0]),
        }
    }

    pub fn targets(&self) -> Vec<Arc<Target>> {
        match &self.upstreams {
            Upstreams::Single(target) => vec![Arc::clone(target)],
            Upstreams::Balanced(lb) => lb.targets().to_vec(),
        }
    }

    fn select(&self) -> Arc<Target> {
        match &self.upstreams {
            Upstreams::Single(target) => Arc::clone(target),
            Upstreams::Balanced(lb) => lb.next(),
        }
    }

    /// Send the inbound request upstream with `body` in place of the
    /// original body. Method, path and query are preserved.
    pub async fn forward_request(&self, parts: &Parts, body: Bytes) -> Result<reqwest::Response> {
        let start = Instant::now();
        let target = self.select();
        let url = target.join(parts.uri.path(), parts.uri.query());
        let headers = forward_request_headers(&parts.headers);

        debug!(method = %parts.method, url = %url, headers = headers.len(), "Forwarding request");

        let response = self
            .client
            .request(parts.method.clone(), url)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        debug!(
            status = response.status().as_u16(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            upstream = %target,
            "Upstream responded"
        );

        Ok(response)
    }

    /// Convert an upstream response into a client response. The body is
    /// streamed through unmodified.
    pub fn copy_response(response: reqwest::Response) -> Response<ProxyBody> {
        let status = response.status();
        let headers = forward_response_headers(response.headers());

        let stream = response
            .bytes_stream()
            .map_ok(Frame::data)
            .map_err(|e| Box::new(e) as BoxError);
        let body = StreamBody::new(stream).boxed_unsync();

        let mut out = Response::new(body);
        *out.status_mut() = status;
        *out.headers_mut() = headers;
        out
    }

    /// Probe the primary target's health path. Only a 2xx within
    /// `deadline` counts as healthy.
    pub async fn is_healthy(&self, deadline: Duration) -> bool {
        let target = self.primary_target();
        let url = target.join(&self.health_path, None);

        match tokio::time::timeout(deadline, self.client.get(url.clone()).send()).await {
            Ok(Ok(response)) => {
                let healthy = response.status().is_success();
                if !healthy {
                    warn!(url = %url, status = response.status().as_u16(), "Upstream health check failed");
                }
                healthy
            }
            Ok(Err(e)) => {
                warn!(url = %url, error = %e, "Upstream health check failed");
                false
            }
            Err(_) => {
                warn!(url = %url, timeout = ?deadline, "Upstream health check timed out");
                false
            }
        }
    }
}
