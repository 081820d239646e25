#[cfg(feature = "api")]
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::core::daily_usage::DailyUsage;

/// Main error type for the application
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// I/O errors (file operations, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image encoding errors; unreadable uploads are [`AppError::BadImage`]
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The upload is not an image we can read
    #[error("Bad image: {0}")]
    BadImage(String),

    /// Upload exceeds the configured size limit
    #[error("File too large: {0}")]
    PayloadTooLarge(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request rejected by policy (e.g. origin not allowed)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Rate limiting errors
    #[error("Rate limit exceeded: {message} (retry after {retry_after:?}s)")]
    RateLimit {
        /// The error message.
        message: String,
        /// The number of seconds to wait before retrying.
        retry_after: Option<u64>,
    },

    /// Daily free quota used up
    #[error("Daily limit exceeded: {} of {} used", .0.used, .0.limit)]
    QuotaExceeded(Box<DailyUsage>),

    /// Upload errors
    #[error("Upload error: {0}")]
    UploadError(String),

    /// Vision model call failed
    #[error("Vision model error: {0}")]
    Vision(#[from] VisionError),

    /// The model answered but the answer was unusable
    #[error("AI response parse error: {0}")]
    AiParse(String),

    /// Processing did not finish in time
    #[error("Timed out after {0}ms")]
    Timeout(u64),

    /// Internal server errors
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Errors raised by a [`VisionClient`](crate::core::vision::VisionClient).
#[derive(Debug, Clone, thiserror::Error)]
pub enum VisionError {
    /// No API key configured
    #[error("vision client is not configured: {0}")]
    NotConfigured(String),

    /// The request exceeded its deadline
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    /// Connection, DNS or body transfer failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status from the API
    #[error("HTTP {status}: {message}")]
    Http {
        /// HTTP status code returned by the API.
        status: u16,
        /// Response body, truncated.
        message: String,
    },

    /// The API returned no message content
    #[error("empty response content")]
    EmptyContent,

    /// The response body could not be decoded
    #[error("malformed response: {0}")]
    Parse(String),
}

/// Standard error response format
#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    /// HTTP status code
    pub code: u16,
    /// Machine-readable error code
    pub error: &'static str,
    /// Error message
    pub message: String,
    /// Optional error details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Usage snapshot attached to quota errors
    #[serde(rename = "dailyUsage", skip_serializing_if = "Option::is_none")]
    pub daily_usage: Option<serde_json::Value>,
}

impl AppError {
    /// Get the HTTP status code for this error
    #[cfg(feature = "api")]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) | Self::UploadError(_) | Self::BadImage(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::RateLimit { .. } | Self::QuotaExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Timeout(_) | Self::Vision(VisionError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            Self::Vision(_) | Self::AiParse(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code shared by both response envelopes
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimit { .. } => "RATE_LIMIT",
            Self::QuotaExceeded(_) => "QUOTA_EXCEEDED",
            Self::BadImage(_) | Self::UploadError(_) => "BAD_IMAGE_FORMAT",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Timeout(_) | Self::Vision(VisionError::Timeout(_)) => "AI_TIMEOUT",
            Self::AiParse(_) => "AI_PARSE_ERROR",
            Self::Vision(_) => "AI_UPSTREAM",
            _ => "INTERNAL",
        }
    }

    /// Whether the message is safe to show to clients verbatim
    fn is_client_facing(&self) -> bool {
        !matches!(
            self,
            Self::Io(_) | Self::Image(_) | Self::Json(_) | Self::Config(_) | Self::Internal(_)
        )
    }

    /// Convert the error to a JSON response
    pub fn to_json(&self) -> ErrorResponse {
        #[cfg(feature = "api")]
        let status = self.status_code().as_u16();
        #[cfg(not(feature = "api"))]
        let status = 500u16;

        let message = if self.is_client_facing() {
            self.to_string()
        } else {
            "Internal server error".to_string()
        };

        match self {
            Self::RateLimit {
                message,
                retry_after,
            } => ErrorResponse {
                code: status,
                error: self.code(),
                message: message.clone(),
                details: retry_after.map(|secs| format!("Retry after {} seconds", secs)),
                daily_usage: None,
            },
            Self::QuotaExceeded(usage) => ErrorResponse {
                code: status,
                error: self.code(),
                message: format!(
                    "Daily limit of {} free crops exceeded. Resets at {}.",
                    usage.limit,
                    usage.reset_time.to_rfc3339()
                ),
                details: None,
                daily_usage: serde_json::to_value(usage.as_ref()).ok(),
            },
            _ => ErrorResponse {
                code: status,
                error: self.code(),
                message,
                details: None,
                daily_usage: None,
            },
        }
    }
}

#[cfg(feature = "api")]
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("request failed: {}", self);
        } else {
            log::debug!("request rejected: {}", self);
        }

        let mut response = (status, Json(self.to_json())).into_response();
        if let Self::RateLimit {
            retry_after: Some(secs),
            ..
        } = &self
        {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("Task join error: {}", err))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

#[cfg(feature = "api")]
impl From<axum::extract::multipart::MultipartError> for AppError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge(err.body_text())
        } else {
            AppError::UploadError(err.body_text())
        }
    }
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, AppError>;

/// Extension trait for working with Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context<C>(self, context: C) -> Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static;

    /// Add context to an error if the result is an error
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context<C>(self, context: C) -> Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static,
    {
        self.map_err(|e| AppError::Internal(format!("{}: {}", context, e)))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(|e| {
            let context = f();
            AppError::Internal(format!("{}: {}", context, e))
        })
    }
}
