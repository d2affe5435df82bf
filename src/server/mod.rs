//! HTTP surface of the service
//!
//! One router, one shared pipeline. The model is loaded before the router is
//! built and handed to every handler through [`AppState`].

pub mod error;
pub mod handlers;

use crate::processor::RemovalPipeline;
use crate::worker::WorkerPool;
use axum::extract::{DefaultBodyLimit, Request};
use axum::http::HeaderName;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, info_span};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// State shared by all handlers
#[derive(Debug, Clone)]
pub struct AppState {
    pub pipeline: RemovalPipeline,
    pub workers: WorkerPool,
}

impl AppState {
    #[must_use]
    pub fn new(pipeline: RemovalPipeline, workers: WorkerPool) -> Self {
        Self { pipeline, workers }
    }
}

/// Build the router
///
/// Request bodies larger than `max_upload_bytes` are rejected with 413.
pub fn create_router(state: AppState, max_upload_bytes: usize) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/remove_bg", post(handlers::remove_bg))
        .route("/preview", post(handlers::preview))
        // The configured limit replaces axum's 2 MB default.
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                info_span!(
                    "request",
                    method = %request.method(),
                    path = %request.uri().path(),
                    request_id = %request_id,
                )
            }),
        )
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .with_state(state)
}

/// Serve `router` on `listener` until Ctrl-C or SIGTERM
///
/// The worker pool is closed once the server stops accepting requests.
///
/// # Errors
/// - Listener I/O errors
pub async fn serve(listener: TcpListener, router: Router, workers: WorkerPool) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, workers = workers.size(), "🌐 Listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    workers.close();
    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Received shutdown signal");
}
