//! In-process upstream used by the proxy tests

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde_json::{json, Map, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;

/// How long `/slow` waits before echoing
pub const SLOW_RESPONSE_DELAY: Duration = Duration::from_millis(500);

/// Start an upstream that echoes each request back as JSON:
/// `{method, path, query, headers, body}`.
///
/// `/health` answers 200, `/unhealthy` answers 503 and `/redirect`
/// answers 302. `/slow` echoes after [`SLOW_RESPONSE_DELAY`].
pub async fn spawn_echo_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service_fn(echo))
                    .await;
            });
        }
    });

    addr
}

async fn echo(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path().to_string();

    match path.as_str() {
        "/health" => return Ok(Response::new(Full::new(Bytes::from("ok")))),
        "/unhealthy" => {
            let mut resp = Response::new(Full::new(Bytes::from("down")));
            *resp.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
            return Ok(resp);
        }
        "/slow" => tokio::time::sleep(SLOW_RESPONSE_DELAY).await,
        "/redirect" => {
            let resp = Response::builder()
                .status(StatusCode::FOUND)
                .header("location", "/elsewhere")
                .body(Full::new(Bytes::new()))
                .unwrap();
            return Ok(resp);
        }
        _ => {}
    }

    let method = req.method().to_string();
    let query = req.uri().query().unwrap_or("").to_string();
    let headers: Map<String, Value> = req
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), json!(v.to_str().unwrap_or(""))))
        .collect();
    let body = req.into_body().collect().await.unwrap().to_bytes();

    let payload = json!({
        "method": method,
        "path": path,
        "query": query,
        "headers": headers,
        "body": String::from_utf8_lossy(&body),
    });

    let resp = Response::builder()
        .status(StatusCode::CREATED)
        .header("content-type", "application/json")
        .header("x-upstream", "echo")
        .body(Full::new(Bytes::from(payload.to_string())))
        .unwrap();
    Ok(resp)
}

/// Collect a response body and parse it as JSON
pub async fn json_body<B>(body: B) -> Value
where
    B: hyper::body::Body,
    B::Error: std::fmt::Debug,
{
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
