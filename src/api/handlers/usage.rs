use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::{
    api::extract::ClientIp,
    core::daily_usage::format_reset_time,
    models::platform::{DEFAULT_SCENE, PLATFORM_SPECS},
    state::AppState,
};

/// `GET /api/usage-status`; reading the status does not count as usage.
pub(crate) async fn usage_status(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
) -> Json<Value> {
    let usage = state.daily_usage.status(&ip);
    let now = Utc::now();
    Json(json!({
        "status": "success",
        "data": {
            "used": usage.used,
            "limit": usage.limit,
            "remaining": usage.remaining,
            "resetTime": usage.reset_time,
            "resetIn": format_reset_time(usage.reset_time, now),
            "shouldWarn": usage.should_warn,
            "allowed": usage.allowed,
            "warningThreshold": state.daily_usage.warning_threshold(),
        },
        "timestamp": now.to_rfc3339(),
    }))
}

/// `GET /api/platforms`
pub(crate) async fn platforms() -> Json<Value> {
    Json(json!({
        "default": DEFAULT_SCENE,
        "platforms": PLATFORM_SPECS,
    }))
}
