//! Request handlers

use super::error::{ApiError, ApiResult};
use super::AppState;
use crate::processor::ProcessedImage;
use axum::body::Bytes;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use base64::Engine as _;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Multipart field carrying the upload
pub const IMAGE_FIELD: &str = "image";

/// Liveness probe, plain `ok`
pub async fn root() -> &'static str {
    "ok"
}

/// Health response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub model: String,
    /// Startup model load time, when the backend measured it
    pub model_load_ms: Option<u64>,
    pub timestamp: String,
}

/// Structured health check
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let processor = state.pipeline.processor();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model: processor.model_name().to_string(),
        model_load_ms: processor
            .model_load_time()
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Remove the background of the uploaded image and return a PNG
pub async fn remove_bg(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<impl IntoResponse> {
    let upload = read_image_field(multipart?).await?;
    let processed = process(&state, upload).await?;
    Ok(([(header::CONTENT_TYPE, "image/png")], processed.png))
}

/// Preview response carrying the PNG as base64.
#[derive(Debug, Serialize, Deserialize)]
pub struct PreviewResponse {
    pub png_base64: String,
}

/// Same pipeline as `remove_bg`, answered as JSON
pub async fn preview(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<PreviewResponse>> {
    let upload = read_image_field(multipart?).await?;
    let processed = process(&state, upload).await?;
    Ok(Json(PreviewResponse {
        png_base64: base64::engine::general_purpose::STANDARD.encode(&processed.png),
    }))
}

/// Read the `image` field, skipping any other fields
async fn read_image_field(mut multipart: Multipart) -> ApiResult<Bytes> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let data = field.bytes().await?;
        if data.is_empty() {
            return Err(ApiError::EmptyUpload);
        }
        tracing::debug!(upload_bytes = data.len(), "Upload received");
        return Ok(data);
    }
    Err(ApiError::MissingImage)
}

async fn process(state: &AppState, upload: Bytes) -> ApiResult<ProcessedImage> {
    let pipeline = state.pipeline.clone();
    let processed = state
        .workers
        .run(move || pipeline.process_upload(&upload))
        .await??;
    Ok(processed)
}
