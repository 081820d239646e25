//! Utility functions and helpers shared by the HTTP handlers

use std::net::SocketAddr;
use std::time::Duration;

use http::HeaderMap;
use uuid::Uuid;

/// Resolve the client address: the first `X-Forwarded-For` entry, then
/// `X-Real-IP`, then the peer address, else `unknown`.
pub(crate) fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(first) = header("x-forwarded-for").and_then(|v| v.split(',').next()) {
        let first = first.trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }
    if let Some(real) = header("x-real-ip") {
        return real.to_string();
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Fresh request id.
pub(crate) fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Request id of the `index`-th (0-based) file of a batch.
pub(crate) fn batch_item_id(batch_id: &str, index: usize) -> String {
    format!("{}_{}", batch_id, index + 1)
}

/// `Maximum N requests per M minutes`.
pub(crate) fn rate_limit_message(limit: u32, window: Duration) -> String {
    format!("Maximum {} requests per {} minutes", limit, window.as_secs() / 60)
}

/// Whole seconds to wait, rounded up so clients never retry early.
pub(crate) fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs();
    if wait.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

/// Milliseconds as reported in responses.
pub(crate) fn elapsed_ms(start: std::time::Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
