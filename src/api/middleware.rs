use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use serde_json::json;
use std::sync::Arc;

use super::extract::ClientIp;
use crate::{
    error::{AppError, Result},
    security::EventLevel,
    state::AppState,
    utils::{rate_limit_message, retry_after_secs},
};

/// Consume one request from `<scope>:<ip>`, or fail with `RATE_LIMIT`.
pub(crate) fn enforce_rate_limit(state: &AppState, scope: &str, ip: &str) -> Result<u32> {
    let key = format!("{}:{}", scope, ip);
    let decision = state.rate_limiter.consume(&key);
    if decision.allowed {
        return Ok(decision.remaining);
    }

    state.security.event(
        "rate_limit_exceeded",
        json!({ "clientIp": ip, "scope": scope }),
        EventLevel::Warn,
    );
    Err(AppError::RateLimit {
        message: rate_limit_message(state.rate_limiter.limit(), state.rate_limiter.window()),
        retry_after: Some(retry_after_secs(decision.reset_after)),
    })
}

/// Per-IP limit shared by every API route.
pub(crate) async fn global_rate_limit(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    request: Request,
    next: Next,
) -> Result<Response> {
    let remaining = enforce_rate_limit(&state, "api", &ip)?;

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("ratelimit-limit", HeaderValue::from(state.rate_limiter.limit()));
    headers.insert("ratelimit-remaining", HeaderValue::from(remaining));
    Ok(response)
}
