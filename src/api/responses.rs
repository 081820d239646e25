//! Response envelopes of the versioned contract route

use axum::{
    http::{header, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::{
    error::AppError,
    models::solution::{CONTRACT_VERSION, SCENE_PROMPT_VERSION},
};

/// Contract version header.
pub(crate) const API_VERSION_HEADER: HeaderName = HeaderName::from_static("x-crop-api-version");
/// Prompt version header.
pub(crate) const PROMPT_VERSION_HEADER: HeaderName = HeaderName::from_static("x-prompt-version");

fn version_headers() -> [(HeaderName, HeaderValue); 2] {
    [
        (API_VERSION_HEADER, HeaderValue::from_static(CONTRACT_VERSION)),
        (PROMPT_VERSION_HEADER, HeaderValue::from_static(SCENE_PROMPT_VERSION)),
    ]
}

/// JSON body sent with the contract version headers.
#[derive(Debug)]
pub(crate) struct ContractJson<T>(pub(crate) T);

impl<T: Serialize> IntoResponse for ContractJson<T> {
    fn into_response(self) -> Response {
        (version_headers(), Json(self.0)).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
    request_id: String,
}

/// An [`AppError`] rendered as `{error: {code, message, details}, request_id}`.
#[derive(Debug)]
pub(crate) struct ContractFailure {
    error: AppError,
    request_id: String,
}

impl ContractFailure {
    pub(crate) fn new(error: AppError, request_id: &str) -> Self {
        Self {
            error,
            request_id: request_id.to_string(),
        }
    }
}

impl IntoResponse for ContractFailure {
    fn into_response(self) -> Response {
        let status = self.error.status_code();
        let code = self.error.code();
        let rendered = self.error.to_json();

        let (message, details) = match &self.error {
            AppError::RateLimit { message, .. } => {
                (format!("Rate limit exceeded. {}", message), rendered.details)
            }
            _ if code == "INTERNAL" => (
                rendered.message,
                Some("An unexpected error occurred during image analysis".to_string()),
            ),
            _ => (rendered.message, rendered.details),
        };

        if status.is_server_error() {
            log::error!("[{}] contract request failed: {}", self.request_id, self.error);
        }

        let body = ErrorEnvelope {
            error: ErrorBody {
                code,
                message,
                details,
            },
            request_id: self.request_id,
        };
        let mut response = (status, version_headers(), Json(body)).into_response();
        if let AppError::RateLimit {
            retry_after: Some(secs),
            ..
        } = &self.error
        {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
