use axum::{
    extract::{Multipart, State},
    http::{header, HeaderMap},
    Json,
};
use chrono::Utc;
use futures::{stream, StreamExt};
use serde_json::{json, Value};
use std::{sync::Arc, time::Instant};

use crate::{
    api::{extract::ClientIp, middleware::enforce_rate_limit, upload::UploadForm},
    built_info,
    core::{
        hash::{sha3_256_hex, upload_cache_key},
        prompt::Language,
    },
    error::{AppError, Result},
    models::{
        solution::{BatchItem, BatchResponse, CropOutcome, CropResponse},
        upload::UploadedImage,
    },
    security::{is_valid_origin, validate_upload, EventLevel},
    state::AppState,
    utils::{batch_item_id, elapsed_ms, new_request_id},
};

/// Files accepted by one batch request.
pub(crate) const MAX_BATCH_FILES: usize = 20;

fn language_of(form: &UploadForm) -> Language {
    form.text("language")
        .map(Language::from_code)
        .unwrap_or_default()
}

fn check_upload(state: &AppState, upload: &UploadedImage) -> Result<()> {
    validate_upload(
        upload,
        state.config.max_image_size,
        &state.config.allowed_image_types,
    )
}

/// `POST /api/crop/aesthetic`
pub(crate) async fn aesthetic(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<CropOutcome>> {
    let form = UploadForm::read(multipart).await?;
    let upload = form.require_file("image")?;
    check_upload(&state, upload)?;

    let request_id = new_request_id();
    let outcome = state
        .pipeline
        .run(upload, language_of(&form), "aesthetic", &request_id)
        .await?;
    Ok(Json(outcome))
}

/// `POST /api/crop/batch-aesthetic`
///
/// Each file succeeds or fails on its own; the request only fails when the
/// form itself is unusable.
pub(crate) async fn batch_aesthetic(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<BatchResponse>> {
    let form = UploadForm::read(multipart).await?;
    let uploads = form.files("images");
    if uploads.is_empty() {
        return Err(AppError::UploadError(
            "Upload at least one image".to_string(),
        ));
    }
    if uploads.len() > MAX_BATCH_FILES {
        return Err(AppError::InvalidInput(format!(
            "At most {} images per batch, got {}",
            MAX_BATCH_FILES,
            uploads.len()
        )));
    }

    let language = language_of(&form);
    let batch_id = new_request_id();
    log::info!("[{}] batch aesthetic crop of {} images", batch_id, uploads.len());

    let total = uploads.len();
    let results: Vec<BatchItem> = stream::iter(uploads.into_iter().enumerate())
        .map(|(index, upload)| {
            let state = Arc::clone(&state);
            let request_id = batch_item_id(&batch_id, index);
            async move {
                let result = match check_upload(&state, &upload) {
                    Ok(()) => {
                        state
                            .pipeline
                            .run(&upload, language, "batch", &request_id)
                            .await
                    }
                    Err(e) => Err(e),
                };
                match result {
                    Ok(outcome) => BatchItem::Done(Box::new(outcome)),
                    Err(e) => {
                        log::warn!("[{}] {} failed: {}", request_id, upload.file_name, e);
                        BatchItem::failed(&upload.file_name, e.to_string())
                    }
                }
            }
        })
        .buffered(state.config.max_concurrent_requests.max(1))
        .collect()
        .await;

    let success_count = results.iter().filter(|r| r.is_success()).count();
    log::info!(
        "[{}] batch finished: {}/{} succeeded",
        batch_id,
        success_count,
        results.len()
    );

    Ok(Json(BatchResponse {
        success: true,
        batch_id,
        total,
        success_count,
        results,
    }))
}

/// `POST /api/crop`, the quota-guarded public route.
pub(crate) async fn public_crop(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<CropResponse>> {
    let started = Instant::now();
    match crop_for_client(&state, &ip, &headers, multipart, started).await {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            state.security.event(
                "crop_request_error",
                json!({
                    "clientIp": ip,
                    "error": e.to_string(),
                    "code": e.code(),
                    "processingTime": elapsed_ms(started),
                }),
                EventLevel::Error,
            );
            Err(e)
        }
    }
}

async fn crop_for_client(
    state: &AppState,
    ip: &str,
    headers: &HeaderMap,
    multipart: Multipart,
    started: Instant,
) -> Result<CropResponse> {
    let usage = state.daily_usage.check(ip, false);
    if !usage.allowed {
        return Err(AppError::QuotaExceeded(Box::new(usage)));
    }

    enforce_rate_limit(state, "crop", ip)?;

    if let Some(origin) = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()) {
        if !is_valid_origin(origin, &state.config.cors_origins) {
            state.security.event(
                "cors_violation",
                json!({ "origin": origin, "clientIp": ip }),
                EventLevel::Warn,
            );
            return Err(AppError::Forbidden("CORS policy violation".to_string()));
        }
    }

    let form = UploadForm::read(multipart).await?;
    let upload = form.require_file("image")?;
    check_upload(state, upload)?;

    let image_hash = sha3_256_hex(&upload.data);
    let cache_key = upload_cache_key(&image_hash, &upload.extension(), &upload.content_type);

    if state.config.enable_dedup_cache {
        if let Some(mut cached) = state.crop_cache.get(&cache_key) {
            // replays do not count toward the quota
            cached.daily_usage = state.daily_usage.status(ip);
            cached.cached = true;
            cached.processing_time = elapsed_ms(started);
            state.security.event(
                "cache_hit",
                json!({ "imageHash": image_hash, "formatAwareCacheKey": cache_key, "clientIp": ip }),
                EventLevel::Info,
            );
            return Ok(cached);
        }
    }

    let usage = state.daily_usage.check(ip, true);
    if !usage.allowed {
        return Err(AppError::QuotaExceeded(Box::new(usage)));
    }

    let request_id = new_request_id();
    let deadline = state.config.crop_timeout;
    let mut outcome = tokio::time::timeout(
        deadline,
        state
            .pipeline
            .run(upload, Language::default(), "aesthetic", &request_id),
    )
    .await
    .map_err(|_| AppError::Timeout(deadline.as_millis() as u64))??;
    outcome.metadata.file = Some(upload.file_metadata());

    let response = CropResponse {
        outcome,
        image_hash,
        format_aware_cache_key: cache_key,
        original_format: upload.original_format(),
        processing_time: elapsed_ms(started),
        timestamp: Utc::now(),
        cached: false,
        daily_usage: usage,
    };

    if state.config.enable_dedup_cache {
        state
            .crop_cache
            .set(response.format_aware_cache_key.clone(), response.clone());
        state.security.event(
            "cache_store",
            json!({ "imageHash": response.image_hash, "formatAwareCacheKey": response.format_aware_cache_key, "clientIp": ip }),
            EventLevel::Info,
        );
    }

    state.security.event(
        "crop_request_success",
        json!({
            "clientIp": ip,
            "fileSize": upload.size(),
            "fileType": upload.content_type,
            "processingTime": response.processing_time,
            "imageHash": response.image_hash,
        }),
        EventLevel::Info,
    );

    Ok(response)
}

/// `GET /api/crop`
pub(crate) async fn info(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "service": "AI Crop API",
        "version": built_info::PKG_VERSION,
        "status": "active",
        "features": {
            "rateLimit": config.rate_limit_description(),
            "imageValidation": true,
            "deduplication": config.enable_dedup_cache,
            "monitoring": config.enable_logging,
        },
        "limits": {
            "maxImageSize": config.max_image_size,
            "allowedTypes": config.allowed_image_types,
            "dailyLimit": config.daily_usage_limit,
        },
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
