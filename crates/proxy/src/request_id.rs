//! Per-request correlation ids

use rand::rngs::OsRng;
use rand::RngCore;
use std::time::{SystemTime, UNIX_EPOCH};

/// 16 hex characters from the OS RNG, or `req_<nanos>` if the RNG fails.
/// Never fails.
pub fn generate() -> String {
    let mut bytes = [0u8; 8];
    match OsRng.try_fill_bytes(&mut bytes) {
        Ok(()) => bytes.iter().map(|b| format!("{:02x}", b)).collect(),
        Err(_) => fallback(),
    }
}

fn fallback() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("req_{}", nanos)
}
