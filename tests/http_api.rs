//! HTTP surface exercised through the router with the mock backend

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::Engine as _;
use bgremove_server::server::handlers::{HealthResponse, PreviewResponse};
use bgremove_server::server::error::ErrorResponse;
use bgremove_server::{
    create_router, AppState, BackgroundRemovalProcessor, ImageIOService, MockBackend, MockOutput,
    ModelProfile, ModelSpec, RemovalConfig, RemovalPipeline, WorkerPool,
};
use image::{DynamicImage, GenericImageView, ImageBuffer, Rgb, Rgba};
use std::sync::Arc;
use tower::ServiceExt;

const BOUNDARY: &str = "X-BGREMOVE-TEST-BOUNDARY";
const UPLOAD_LIMIT: usize = 1024 * 1024;

fn router(output: MockOutput) -> Router {
    let config = RemovalConfig::builder()
        .model_spec(ModelSpec::cached(ModelProfile::U2netp))
        .build()
        .unwrap();
    let backend = Box::new(MockBackend::with_output(ModelProfile::U2netp, output));
    let processor = BackgroundRemovalProcessor::with_backend(config, backend).unwrap();
    let state = AppState::new(RemovalPipeline::new(Arc::new(processor)), WorkerPool::new(2));
    create_router(state, UPLOAD_LIMIT)
}

fn png_upload(width: u32, height: u32) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(width, height, Rgb([200, 40, 40])));
    ImageIOService::encode_png(&image).unwrap()
}

fn multipart_body(field: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"upload.bin\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(uri: &str, field: &str, data: &[u8]) -> Request<Body> {
    let body = multipart_body(field, data);
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

#[tokio::test]
async fn test_root_returns_ok() {
    let response = router(MockOutput::CenteredBlob)
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    assert_eq!(body_bytes(response).await, b"ok");
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let response = router(MockOutput::CenteredBlob)
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn test_health_reports_model() {
    let response = router(MockOutput::CenteredBlob)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let health: HealthResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(health.status, "ok");
    assert_eq!(health.model, "mock-u2netp");
    assert!(health.model_load_ms.is_some());
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_remove_bg_returns_png_cutout() {
    let response = router(MockOutput::CenteredBlob)
        .oneshot(upload_request("/remove_bg", "image", &png_upload(64, 48)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "image/png");

    let cutout = image::load_from_memory(&body_bytes(response).await).unwrap();
    assert_eq!(cutout.dimensions(), (64, 48));
    let rgba = cutout.to_rgba8();
    assert_eq!(rgba.get_pixel(0, 0).0[3], 0);
    assert!(rgba.get_pixel(32, 24).0[3] > 200);
}

#[tokio::test]
async fn test_fallback_returns_normalized_input() {
    let upload = png_upload(30, 20);
    let response = router(MockOutput::Constant(1.0))
        .oneshot(upload_request("/remove_bg", "image", &upload))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let normalized = ImageIOService::normalize_upload(&upload, 3000).unwrap();
    assert_eq!(
        body_bytes(response).await,
        ImageIOService::encode_png(&normalized.image).unwrap()
    );
}

#[tokio::test]
async fn test_preview_returns_base64_png() {
    let response = router(MockOutput::CenteredBlob)
        .oneshot(upload_request("/preview", "image", &png_upload(16, 16)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let preview: PreviewResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    let png = base64::engine::general_purpose::STANDARD
        .decode(preview.png_base64)
        .unwrap();
    assert_eq!(image::load_from_memory(&png).unwrap().dimensions(), (16, 16));
}

#[tokio::test]
async fn test_non_image_is_unprocessable_and_service_survives() {
    let app = router(MockOutput::CenteredBlob);

    let response = app
        .clone()
        .oneshot(upload_request("/remove_bg", "image", b"definitely not an image"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let error: ErrorResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(error.code, "decode_error");

    let response = app
        .oneshot(upload_request("/remove_bg", "image", &png_upload(8, 8)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_missing_image_field_is_bad_request() {
    let response = router(MockOutput::CenteredBlob)
        .oneshot(upload_request("/remove_bg", "file", &png_upload(8, 8)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error: ErrorResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(error.code, "missing_image");
}

#[tokio::test]
async fn test_empty_upload_is_bad_request() {
    let response = router(MockOutput::CenteredBlob)
        .oneshot(upload_request("/remove_bg", "image", b""))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error: ErrorResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(error.code, "empty_upload");
}

#[tokio::test]
async fn test_non_multipart_body_is_bad_request() {
    let request = Request::post("/remove_bg")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let response = router(MockOutput::CenteredBlob).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_oversized_upload_is_rejected() {
    let oversized = vec![0u8; UPLOAD_LIMIT + 1];
    let response = router(MockOutput::CenteredBlob)
        .oneshot(upload_request("/remove_bg", "image", &oversized))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_inference_failure_is_server_error() {
    let response = router(MockOutput::Failure)
        .oneshot(upload_request("/remove_bg", "image", &png_upload(8, 8)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let error: ErrorResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(error.code, "inference_error");
}

#[tokio::test]
async fn test_transparent_upload_stays_transparent() {
    let image = DynamicImage::ImageRgba8(ImageBuffer::from_pixel(40, 40, Rgba([255, 0, 0, 0])));
    let upload = ImageIOService::encode_png(&image).unwrap();
    let response = router(MockOutput::CenteredBlob)
        .oneshot(upload_request("/remove_bg", "image", &upload))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let cutout = image::load_from_memory(&body_bytes(response).await).unwrap().to_rgba8();
    assert!(cutout.pixels().all(|p| p.0[3] == 0));
}
