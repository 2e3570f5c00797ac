use axum::extract::{FromRequest, Multipart, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::Form;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::error::UploadError;
use crate::core::types::{UploadOutcome, UploadSource};
use crate::storage::{self, ListingView, ObjectStore};

use super::router::AppState;

// ---------------------------------------------------------------------------
// Response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct UploadResponse {
    status: &'static str,
    filename: String,
    url: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: &'static str,
    reason: String,
    code: &'static str,
}

fn error_json(status: StatusCode, code: &'static str, reason: &str) -> Response {
    let body = ErrorResponse {
        status: "error",
        reason: reason.to_string(),
        code,
    };
    (status, Json(body)).into_response()
}

fn upload_error_response(e: &UploadError) -> Response {
    let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    error_json(status, e.error_code(), &e.to_string())
}

fn upload_ok_response(outcome: UploadOutcome) -> Response {
    Json(UploadResponse {
        status: "ok",
        filename: outcome.key,
        url: outcome.url,
    })
    .into_response()
}

fn invalid_request(reason: impl Into<String>) -> Response {
    upload_error_response(&UploadError::InvalidRequest {
        reason: reason.into(),
    })
}

// ---------------------------------------------------------------------------
// Upload handlers
// ---------------------------------------------------------------------------

/// `POST /upload/file` with a multipart `file` part and optional `prefix`.
///
/// The part's Content-Type, when present, is stored as-is.
pub async fn upload_file<S: ObjectStore + 'static>(
    State(state): State<AppState<S>>,
    mut multipart: Multipart,
) -> Response {
    let mut source: Option<UploadSource> = None;
    let mut prefix: Option<String> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "malformed multipart body");
                return error_json(e.status(), "invalid_request", &e.body_text());
            }
        };

        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().map(str::to_string);
                let data = match field.bytes().await {
                    Ok(data) => data,
                    Err(e) => return error_json(e.status(), "invalid_request", &e.body_text()),
                };
                debug!(filename = %filename, size = data.len(), "received multipart file");
                source = Some(UploadSource::InMemoryBody {
                    data,
                    filename,
                    content_type,
                });
            }
            Some("prefix") => match field.text().await {
                Ok(text) => prefix = Some(text),
                Err(e) => return error_json(e.status(), "invalid_request", &e.body_text()),
            },
            _ => {}
        }
    }

    let Some(source) = source else {
        return invalid_request("missing 'file' field");
    };
    let prefix = prefix.unwrap_or_else(|| state.config.server.prefix.clone());

    match state.orchestrator.upload(source, &prefix).await {
        Ok(outcome) => upload_ok_response(outcome),
        Err(e) => upload_error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct UrlUploadRequest {
    pub url: String,
    #[serde(default)]
    pub prefix: Option<String>,
}

/// `POST /upload/url` with `url` (and optional `prefix`) as a form or JSON body.
pub async fn upload_url<S: ObjectStore + 'static>(
    State(state): State<AppState<S>>,
    request: Request,
) -> Response {
    let is_json = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("application/json"))
        .unwrap_or(false);

    let parsed = if is_json {
        Json::<UrlUploadRequest>::from_request(request, &())
            .await
            .map(|Json(body)| body)
            .map_err(|e| e.body_text())
    } else {
        Form::<UrlUploadRequest>::from_request(request, &())
            .await
            .map(|Form(body)| body)
            .map_err(|e| e.body_text())
    };

    let body = match parsed {
        Ok(body) => body,
        Err(reason) => return invalid_request(reason),
    };

    if !body.url.starts_with("http") {
        return invalid_request(format!("not an http(s) url: '{}'", body.url));
    }

    let prefix = body
        .prefix
        .unwrap_or_else(|| state.config.server.prefix.clone());

    match state
        .orchestrator
        .upload(UploadSource::RemoteUrl(body.url), &prefix)
        .await
    {
        Ok(outcome) => upload_ok_response(outcome),
        Err(e) => upload_error_response(&e),
    }
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub prefix: String,
    /// Return public URLs instead of keys.
    #[serde(default)]
    pub urls: bool,
    /// With `urls`, return presigned GET URLs.
    #[serde(default)]
    pub sign: bool,
    /// Presign lifetime in seconds; defaults to `aws.sign_ttl_secs`.
    pub ttl: Option<u64>,
}

/// `GET /list?prefix=&urls=&sign=&ttl=` returns a JSON array served through
/// the listing cache.
pub async fn list_objects<S: ObjectStore + 'static>(
    State(state): State<AppState<S>>,
    Query(query): Query<ListQuery>,
) -> Response {
    let ttl_secs = query.ttl.unwrap_or(state.config.aws.sign_ttl_secs);
    let Some(ttl) = storage::presign_ttl(ttl_secs) else {
        return invalid_request(format!(
            "ttl must be between 1 and {} seconds",
            storage::MAX_PRESIGN_TTL_SECS
        ));
    };
    let view = ListingView::from_flags(query.urls, query.sign, ttl);

    let keys = match state.listing.get(&query.prefix).await {
        Ok(keys) => keys,
        Err(e) => {
            warn!(prefix = %query.prefix, error = %e, "listing failed");
            return error_json(StatusCode::BAD_GATEWAY, "store_list_failed", &e.to_string());
        }
    };

    debug!(prefix = %query.prefix, count = keys.len(), ?view, "listing served");
    match storage::present_listing(state.orchestrator.store().as_ref(), keys, view).await {
        Ok(items) => Json(items).into_response(),
        Err(e) => {
            warn!(prefix = %query.prefix, error = %e, "presigning failed");
            error_json(StatusCode::BAD_GATEWAY, "store_sign_failed", &e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Health endpoints
// ---------------------------------------------------------------------------

/// `GET /metrics`, Prometheus text exposition.
pub async fn metrics_handler<S: ObjectStore + 'static>(
    State(state): State<AppState<S>>,
) -> Response {
    match &state.metrics_handle {
        Some(handle) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            handle.render(),
        )
            .into_response(),
        None => error_json(
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics_disabled",
            "metrics recorder not installed",
        ),
    }
}

/// `GET /healthz`
pub async fn healthz<S: ObjectStore + 'static>(
    State(state): State<AppState<S>>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "bucket": state.config.aws.bucket,
    }))
}
