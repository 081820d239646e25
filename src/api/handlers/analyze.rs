use axum::{
    extract::{Multipart, State},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::{sync::Arc, time::Instant};

use crate::{
    api::{
        extract::ClientIp,
        middleware::enforce_rate_limit,
        responses::{ContractFailure, ContractJson},
        upload::UploadForm,
    },
    built_info,
    core::{
        crop::AspectRatio,
        hash::{analysis_cache_key, sha3_256_hex},
        pipeline::prepare_image,
        prompt::render,
    },
    error::{AppError, Result},
    models::{
        platform::{find_spec, DEFAULT_SCENE},
        solution::{CropSolution, CONTRACT_VERSION, SCENE_PROMPT_VERSION},
    },
    security::{validate_upload, EventLevel},
    state::AppState,
    utils::{elapsed_ms, new_request_id},
};

/// Ratio requested by the client, else the scene's own, else square.
fn resolve_ratio(requested: Option<&str>, scene: &str) -> Result<AspectRatio> {
    if let Some(raw) = requested {
        return raw.parse();
    }
    Ok(find_spec(scene)
        .and_then(|spec| spec.ratio.parse().ok())
        .unwrap_or_else(AspectRatio::square))
}

/// `POST /api/crop/analyze`, contract version 1.
pub(crate) async fn analyze(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    multipart: Multipart,
) -> std::result::Result<ContractJson<CropSolution>, ContractFailure> {
    let started = Instant::now();
    let request_id = new_request_id();

    match solve(&state, &ip, multipart, &request_id).await {
        Ok(solution) => {
            state.security.event(
                "crop_analyze_success",
                json!({
                    "request_id": request_id,
                    "client_ip": ip,
                    "scene": solution.metadata.scene,
                    "ratio": solution.crop_params.crop_ratio,
                    "source": solution.metadata.source,
                    "processing_time": elapsed_ms(started),
                }),
                EventLevel::Info,
            );
            Ok(ContractJson(solution))
        }
        Err(e) => {
            state.security.event(
                "crop_analyze_error",
                json!({
                    "request_id": request_id,
                    "error": e.to_string(),
                    "processing_time": elapsed_ms(started),
                }),
                EventLevel::Error,
            );
            Err(ContractFailure::new(e, &request_id))
        }
    }
}

async fn solve(
    state: &AppState,
    ip: &str,
    multipart: Multipart,
    request_id: &str,
) -> Result<CropSolution> {
    enforce_rate_limit(state, "crop:analyze", ip)?;

    let form = UploadForm::read(multipart).await?;
    let upload = form.require_file("image")?;
    validate_upload(
        upload,
        state.config.max_image_size,
        &state.config.allowed_image_types,
    )?;

    let scene = form.text("scene").unwrap_or(DEFAULT_SCENE).to_string();
    let ratio = resolve_ratio(form.text("ratio"), &scene)?;

    let prepared = prepare_image(upload.data.clone()).await.map_err(|e| {
        state.security.event(
            "image_dimension_unavailable",
            json!({ "clientIp": ip, "requestId": request_id, "fileType": upload.content_type }),
            EventLevel::Error,
        );
        e
    })?;
    let original = (prepared.dims.width, prepared.dims.height);

    let analyzer = state.pipeline.analyzer();
    let model = analyzer.model().to_string();
    let image_hash = sha3_256_hex(&upload.data);
    let cache_key = analysis_cache_key(
        &image_hash,
        &scene,
        ratio.as_str(),
        &model,
        SCENE_PROMPT_VERSION,
    );

    if state.config.enable_dedup_cache {
        if let Some(cached) = state.solution_cache.get(&cache_key) {
            state.security.event(
                "cache_hit",
                json!({ "cacheKey": cache_key, "clientIp": ip, "requestId": request_id }),
                EventLevel::Info,
            );
            return Ok(cached.replayed(request_id));
        }
    }

    match analyzer
        .analyze_for_scene(&prepared.input, prepared.dims, &scene, &ratio)
        .await
    {
        Ok(suggestion) => {
            let solution =
                CropSolution::from_suggestion(suggestion, original, &ratio, &scene, &model, request_id);
            if state.config.enable_dedup_cache {
                state.solution_cache.set(cache_key, solution.clone());
            }
            Ok(solution)
        }
        Err(e) => {
            // fallbacks are never cached so the next request asks the model again
            log::warn!("[{}] scene analysis failed, using fallback: {}", request_id, e);
            Ok(CropSolution::fallback(original, &ratio, &scene, request_id))
        }
    }
}

/// `GET /api/crop/analyze`
pub(crate) async fn info() -> ContractJson<Value> {
    ContractJson(json!({
        "service": "AI Crop Analyze API",
        "version": built_info::PKG_VERSION,
        "status": "active",
        "contract": format!("v{}", CONTRACT_VERSION),
        "promptVersion": SCENE_PROMPT_VERSION,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// `POST /api/analyze-debug`: a caller-chosen model and prompt, no fallback.
pub(crate) async fn analyze_debug(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Response> {
    let form = UploadForm::read(multipart).await?;
    let upload = form.require_file("image")?;
    let (model, prompt) = match (form.text("model"), form.text("prompt")) {
        (Some(model), Some(prompt)) => (model, prompt),
        _ => {
            return Err(AppError::InvalidInput(
                "Both model and prompt are required".to_string(),
            ))
        }
    };
    validate_upload(
        upload,
        state.config.max_image_size,
        &state.config.allowed_image_types,
    )?;

    let prepared = prepare_image(upload.data.clone()).await?;
    let (width, height) = (prepared.dims.width, prepared.dims.height);
    log::info!(
        "debug analysis with {} ({}x{}, prompt of {} chars)",
        model,
        width,
        height,
        prompt.len()
    );

    let result = state
        .pipeline
        .analyzer()
        .analyze_with_prompt(&prepared.input, prepared.dims, model, prompt)
        .await;

    let response = match result {
        Ok(data) => Json(json!({
            "success": true,
            "data": data,
            "metadata": {
                "model": model,
                "originalWidth": width,
                "originalHeight": height,
                "promptLength": render(prompt, width, height).len(),
            },
        }))
        .into_response(),
        Err(e) => (
            e.status_code(),
            Json(json!({
                "success": false,
                "error": e.to_string(),
                "code": e.code(),
                "metadata": {
                    "model": model,
                    "originalWidth": width,
                    "originalHeight": height,
                },
            })),
        )
            .into_response(),
    };
    Ok(response)
}
