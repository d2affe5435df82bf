//! HTTP error mapping
//!
//! Every failure leaving a handler goes through [`ApiError`], which picks the
//! status code and renders a JSON body `{"detail": ..., "code": ...}`.

use crate::error::BgRemovalError;
use crate::worker::WorkerError;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("multipart field 'image' is required")]
    MissingImage,

    #[error("uploaded image is empty")]
    EmptyUpload,

    #[error("Invalid multipart body: {0}")]
    InvalidMultipart(String),

    #[error("Upload exceeds the size limit")]
    PayloadTooLarge,

    #[error("Could not decode image: {0}")]
    Decode(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Service is shutting down")]
    Unavailable,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingImage | ApiError::EmptyUpload | ApiError::InvalidMultipart(_) => {
                StatusCode::BAD_REQUEST
            },
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Decode(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Inference(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::MissingImage => "missing_image",
            ApiError::EmptyUpload => "empty_upload",
            ApiError::InvalidMultipart(_) => "invalid_multipart",
            ApiError::PayloadTooLarge => "payload_too_large",
            ApiError::Decode(_) => "decode_error",
            ApiError::Inference(_) => "inference_error",
            ApiError::Unavailable => "unavailable",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

impl From<BgRemovalError> for ApiError {
    fn from(err: BgRemovalError) -> Self {
        match err {
            BgRemovalError::Decode(msg) => ApiError::Decode(msg),
            BgRemovalError::Inference(msg) => ApiError::Inference(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<WorkerError> for ApiError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::Closed | WorkerError::Cancelled => ApiError::Unavailable,
            WorkerError::Panicked(msg) => ApiError::Internal(format!("worker panicked: {msg}")),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge
        } else {
            ApiError::InvalidMultipart(err.body_text())
        }
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        ApiError::InvalidMultipart(rejection.body_text())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "Request failed");
        } else {
            tracing::info!(error = %self, code = self.code(), "Request rejected");
        }

        let body = ErrorResponse {
            detail: self.to_string(),
            code: self.code().to_string(),
        };
        (status, Json(body)).into_response()
    }
}
