//! System handlers: health and the OpenAPI document.

use crate::api::AppState;
use crate::session::SessionState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// GET /health - Health check with occupancy and session summary
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "system",
    responses((status = 200, description = "Service is healthy"))
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let (current, max) = state.downloader.occupancy();
    let session = match state.downloader.steam().session_state() {
        SessionState::Unknown => "unknown",
        SessionState::Verified { .. } => "verified",
        SessionState::Invalid => "invalid",
    };
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "occupancy": { "current": current, "max": max },
        "session": session,
    }))
}

/// GET /openapi.json - OpenAPI specification
#[utoipa::path(
    get,
    path = "/api/v1/openapi.json",
    tag = "system",
    responses((status = 200, description = "OpenAPI 3.1 specification in JSON format"))
)]
pub async fn openapi_spec() -> impl IntoResponse {
    use crate::api::openapi::ApiDoc;
    use utoipa::OpenApi;

    (StatusCode::OK, Json(ApiDoc::openapi()))
}
