//! HTTP surface over `AppServices`.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use lms_core::model::{Identity, UserId};
use services::webhook::{SIGNATURE_HEADER, TIMESTAMP_HEADER};
use services::{AppServices, ErrorKind, ProgressError, WebhookError};

pub fn router(services: AppServices) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/zoom", post(zoom_webhook))
        .route(
            "/api/courses/{course}/lessons/{lesson}/watch",
            post(record_watch),
        )
        .route("/api/courses/{course}/progress", get(progress))
        .with_state(services)
}

/// Service error rendered as `{"error": message}`.
#[derive(Debug)]
pub struct ApiError {
    kind: ErrorKind,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.kind {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::ServiceFailure => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.message, "request failed");
        }
        (status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<ProgressError> for ApiError {
    fn from(err: ProgressError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

#[derive(Debug, Deserialize)]
struct WatchRequest {
    user_id: UserId,
    watched_percentage: u32,
}

async fn record_watch(
    State(services): State<AppServices>,
    Path((course, lesson)): Path<(String, String)>,
    Json(request): Json<WatchRequest>,
) -> Result<Response, ApiError> {
    let result = services
        .progress()
        .record_watch(
            &Identity::parse(&course),
            &Identity::parse(&lesson),
            request.user_id,
            request.watched_percentage,
        )
        .await?;
    Ok(Json(result).into_response())
}

#[derive(Debug, Deserialize)]
struct ProgressQuery {
    user_id: UserId,
}

async fn progress(
    State(services): State<AppServices>,
    Path(course): Path<String>,
    Query(query): Query<ProgressQuery>,
) -> Result<Response, ApiError> {
    let summary = services
        .progress()
        .progress_summary(&Identity::parse(&course), query.user_id)
        .await?;
    Ok(Json(summary).into_response())
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Recording events are acknowledged immediately and ingested in the
/// background; everything else is answered inline.
async fn zoom_webhook(
    State(services): State<AppServices>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let webhooks = services.webhooks();
    webhooks.authenticate(
        header(&headers, TIMESTAMP_HEADER),
        header(&headers, SIGNATURE_HEADER),
        &body,
    )?;
    let event = webhooks.decode(&body)?;

    if event.runs_in_background() {
        tokio::spawn(async move {
            match webhooks.dispatch(event).await {
                Ok(reply) => tracing::debug!(?reply, "background webhook finished"),
                Err(err) => tracing::error!(error = %err, "background webhook failed"),
            }
        });
        return Ok(Json(json!({ "status": "accepted" })).into_response());
    }

    let reply = webhooks.dispatch(event).await?;
    Ok(Json(reply).into_response())
}
