use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::io::ReaderStream;

use crate::{error::Result, state::AppState};

/// `GET /api/download/:filename`, streamed as an attachment.
pub(crate) async fn download(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<Response> {
    let path = state.pipeline.store().resolve(&filename).await?;
    let file = tokio::fs::File::open(&path).await?;
    let length = file.metadata().await?.len();
    let mime = mime_guess::from_path(&path).first_or_octet_stream();

    let headers = [
        (header::CONTENT_TYPE, mime.to_string()),
        (header::CONTENT_LENGTH, length.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        ),
    ];
    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}

/// `GET /api/history`
pub(crate) async fn history(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let history = state.pipeline.store().history().await?;
    Ok(Json(json!({ "history": history })))
}
