//! Hop-by-hop header filtering

use http::header::{HeaderMap, HeaderName, CONTENT_LENGTH, HOST};
use tracing::trace;

const REQUEST_SKIP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "proxy-connection",
];

const RESPONSE_SKIP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

fn matches_skip_list(name: &HeaderName, list: &[&str]) -> bool {
    // HeaderName is always lowercase
    let name = name.as_str();
    list.contains(&name) || name.starts_with("proxy-")
}

/// Whether an inbound request header must not be forwarded upstream
pub fn should_skip_request_header(name: &HeaderName) -> bool {
    matches_skip_list(name, REQUEST_SKIP)
}

/// Whether an upstream response header must not be returned to the client
pub fn should_skip_response_header(name: &HeaderName) -> bool {
    matches_skip_list(name, RESPONSE_SKIP)
}

/// Headers to send upstream. `Content-Length` and `Host` are left for the
/// client to recompute from the new body and target URL.
pub fn forward_request_headers(src: &HeaderMap) -> HeaderMap {
    let mut dst = HeaderMap::with_capacity(src.len());
    for (name, value) in src {
        if should_skip_request_header(name) || name == CONTENT_LENGTH || name == HOST {
            trace!(header = %name, "Skipping request header");
            continue;
        }
        dst.append(name.clone(), value.clone());
    }
    dst
}

/// Headers to return to the client
pub fn forward_response_headers(src: &HeaderMap) -> HeaderMap {
    let mut dst = HeaderMap::with_capacity(src.len());
    for (name, value) in src {
        if should_skip_response_header(name) {
            trace!(header = %name, "Skipping response header");
            continue;
        }
        dst.append(name.clone(), value.clone());
    }
    dst
}
