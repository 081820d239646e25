//! API module for handling HTTP requests and responses

pub(crate) mod extract;
pub(crate) mod handlers;
pub(crate) mod middleware;
pub(crate) mod responses;
pub(crate) mod upload;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderValue, Method, Uri},
    middleware::from_fn_with_state,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{built_info, error::AppError, state::AppState};
use handlers::{analyze, crop, files, usage};
use responses::{API_VERSION_HEADER, PROMPT_VERSION_HEADER};

// multipart framing and text fields on top of the file itself
const BODY_SLACK: usize = 1024 * 1024;

/// Create the application router with all routes
///
/// Every route except `/api/health` counts toward the per-IP request
/// limit.
pub fn create_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_image_size.saturating_add(BODY_SLACK);
    let batch_limit = state
        .config
        .max_image_size
        .saturating_mul(crop::MAX_BATCH_FILES)
        .saturating_add(BODY_SLACK);

    let limited = Router::new()
        .route("/api/crop", get(crop::info).post(crop::public_crop))
        .route("/api/crop/analyze", get(analyze::info).post(analyze::analyze))
        .route("/api/crop/aesthetic", post(crop::aesthetic))
        .route(
            "/api/crop/batch-aesthetic",
            post(crop::batch_aesthetic).layer(DefaultBodyLimit::max(batch_limit)),
        )
        .route("/api/analyze-debug", post(analyze::analyze_debug))
        .route("/api/download/:filename", get(files::download))
        .route("/api/history", get(files::history))
        .route("/api/usage-status", get(usage::usage_status))
        .route("/api/platforms", get(usage::platforms))
        .fallback(not_found)
        .layer(from_fn_with_state(
            state.clone(),
            middleware::global_rate_limit,
        ));

    limited
        .route("/api/health", get(health_check))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([header::RETRY_AFTER, API_VERSION_HEADER, PROMPT_VERSION_HEADER]);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                log::warn!("ignoring malformed CORS origin '{}'", o);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "AI Crop Service",
        "version": built_info::PKG_VERSION,
        "timestamp": Utc::now().to_rfc3339(),
        "uptime": state.uptime_secs(),
    }))
}

async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(format!("API route {} does not exist", uri.path()))
}
