//! Job management handlers: submit, status, admin listing, cleanup.

use crate::api::{auth, AppState};
use crate::error::{ApiError, Error};
use crate::types::{JobId, JobSnapshot, SubmitReceipt};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;

/// Request body for a submission
#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitRequest {
    /// Workshop item URL containing an `id=<digits>` parameter
    pub url: String,
}

/// POST /downloads - Submit a workshop item URL
#[utoipa::path(
    post,
    path = "/api/v1/downloads",
    tag = "downloads",
    request_body = SubmitRequest,
    responses(
        (status = 201, description = "Job admitted", body = SubmitReceipt),
        (status = 400, description = "Invalid URL, invalid item, or wrong application"),
        (status = 429, description = "Concurrency cap reached; body carries current and max"),
        (status = 503, description = "Shutting down")
    )
)]
pub async fn submit_download(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitReceipt>), Error> {
    let receipt = state.downloader.submit(&request.url).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// GET /downloads/:id - Job status snapshot
#[utoipa::path(
    get,
    path = "/api/v1/downloads/{id}",
    tag = "downloads",
    params(("id" = u64, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Status snapshot", body = JobSnapshot),
        (status = 404, description = "Unknown job")
    )
)]
pub async fn get_download(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    match state.downloader.status(JobId(id)) {
        Some(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiError::not_found(format!("job {id}"))),
        )
            .into_response(),
    }
}

/// GET /downloads - Admin listing of all live job records
///
/// Requires the observer token (header `x-observer-token`) when one is
/// configured.
#[utoipa::path(
    get,
    path = "/api/v1/downloads",
    tag = "downloads",
    responses(
        (status = 200, description = "All live job records", body = Vec<JobSnapshot>),
        (status = 401, description = "Missing or invalid observer token")
    )
)]
pub async fn list_downloads(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let provided = headers
        .get("x-observer-token")
        .and_then(|value| value.to_str().ok());
    if !auth::verify_observer_token(&state.config.server.api.observer_token, provided) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ApiError::unauthorized("observer token required")),
        )
            .into_response();
    }

    (StatusCode::OK, Json(state.downloader.jobs())).into_response()
}

/// DELETE /downloads/:id - Cancel, dispose, and mark Cleaned
#[utoipa::path(
    delete,
    path = "/api/v1/downloads/{id}",
    tag = "downloads",
    params(("id" = u64, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job cleaned (idempotent)"),
        (status = 404, description = "Unknown job")
    )
)]
pub async fn delete_download(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, Error> {
    state.downloader.cleanup(JobId(id)).await?;
    Ok(Json(json!({"status": "cleaned", "id": id})))
}
