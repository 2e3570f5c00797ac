use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::core::config::AppConfig;
use crate::ingest::orchestrator::UploadOrchestrator;
use crate::storage::cache::ListingCache;
use crate::storage::ObjectStore;

use super::handlers;
use super::middleware::RequestIdLayer;

/// Room left above the upload ceiling for multipart boundaries and headers,
/// so oversized files reach the orchestrator's own size check.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// HTTP router
// ---------------------------------------------------------------------------

/// State shared by all handlers.
pub struct AppState<S: ObjectStore> {
    pub orchestrator: Arc<UploadOrchestrator<S>>,
    pub listing: Arc<ListingCache<S>>,
    pub config: Arc<AppConfig>,
    pub start_time: std::time::Instant,
    /// Absent when no Prometheus recorder was installed (tests).
    pub metrics_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl<S: ObjectStore> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: self.orchestrator.clone(),
            listing: self.listing.clone(),
            config: self.config.clone(),
            start_time: self.start_time,
            metrics_handle: self.metrics_handle.clone(),
        }
    }
}

/// Build the router.
///
/// - `POST /upload/file` multipart `file` (+ optional `prefix`)
/// - `POST /upload/url`  form or JSON `url` (+ optional `prefix`)
/// - `GET  /list`        `?prefix=&urls=`
/// - `GET  /healthz`
/// - `GET  /metrics`
pub fn build_router<S: ObjectStore + 'static>(state: AppState<S>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::PUT,
            http::Method::OPTIONS,
        ])
        .allow_headers(Any)
        .max_age(std::time::Duration::from_secs(86400));

    let body_limit = match state.config.server.upload_limit() {
        Some(max) => DefaultBodyLimit::max(
            usize::try_from(max)
                .unwrap_or(usize::MAX)
                .saturating_add(MULTIPART_OVERHEAD_BYTES),
        ),
        None => DefaultBodyLimit::disable(),
    };

    tracing::info!(
        bucket = %state.config.aws.bucket,
        upload_limit = ?state.config.server.upload_limit(),
        cache_enabled = state.listing.is_enabled(),
        "http routes configured"
    );

    Router::new()
        .route("/upload/file", post(handlers::upload_file::<S>))
        .route("/upload/url", post(handlers::upload_url::<S>))
        .route("/list", get(handlers::list_objects::<S>))
        .route("/healthz", get(handlers::healthz::<S>))
        .route("/metrics", get(handlers::metrics_handler::<S>))
        .layer(cors)
        .layer(body_limit)
        .layer(RequestIdLayer)
        .with_state(state)
}
