//! REST API server module
//!
//! Exposes the submission, status, artifact delivery, cleanup, and log
//! streaming surfaces over HTTP, with OpenAPI documentation and optional
//! Swagger UI.

use crate::config::Config;
use crate::error::Result;
use crate::orchestrator::WorkshopDownloader;
use axum::{
    http::HeaderValue,
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod auth;
pub mod error_response;
pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::AppState;

/// Create the API router with all route definitions
///
/// # Routes
///
/// - `POST /api/v1/downloads` - Submit a workshop item URL
/// - `GET /api/v1/downloads` - Admin listing of live job records
/// - `GET /api/v1/downloads/:id` - Job status snapshot
/// - `DELETE /api/v1/downloads/:id` - Cancel, dispose, mark Cleaned
/// - `GET /api/v1/downloads/:id/file` - Fetch the archive (byte ranges)
/// - `GET /api/v1/logs/stream` - WebSocket log channel
/// - `GET /api/v1/health` - Health check
/// - `GET /api/v1/openapi.json` - OpenAPI specification
/// - `GET /swagger-ui` - Interactive documentation (if enabled)
pub fn create_router(downloader: Arc<WorkshopDownloader>, config: Arc<Config>) -> Router {
    let state = AppState::new(downloader, config.clone());

    let api = Router::new()
        .route("/downloads", post(routes::submit_download))
        .route("/downloads", get(routes::list_downloads))
        .route("/downloads/:id", get(routes::get_download))
        .route("/downloads/:id", delete(routes::delete_download))
        .route("/downloads/:id/file", get(routes::fetch_archive))
        .route("/logs/stream", get(routes::log_stream))
        .route("/health", get(routes::health_check))
        .route("/openapi.json", get(routes::openapi_spec));

    let router = Router::new().nest("/api/v1", api);

    let router = if config.server.api.swagger_ui {
        router.merge(SwaggerUi::new("/swagger-ui").url("/api/v1/openapi.json", ApiDoc::openapi()))
    } else {
        router
    };

    let router = router.with_state(state);

    if config.server.api.cors_enabled {
        router.layer(build_cors_layer(&config.server.api.cors_origins))
    } else {
        router
    }
}

/// Build a CORS layer from the configured origins ("*" allows any).
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");
    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Start the API server on the configured bind address.
///
/// Binds a TCP listener and serves the router until shutdown.
pub async fn start_api_server(
    downloader: Arc<WorkshopDownloader>,
    config: Arc<Config>,
) -> Result<()> {
    let bind_address = config.server.api.bind_address;
    tracing::info!(address = %bind_address, "starting API server");

    let app = create_router(downloader.clone(), config);
    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;
    tracing::info!(address = %bind_address, "API server listening");

    let shutdown = downloader.shutdown_token.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await
    .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}
