//! OpenAPI documentation and schema generation

use utoipa::OpenApi;

/// OpenAPI documentation for the workshop-dl REST API
///
/// The spec can be accessed via:
/// - `/api/v1/openapi.json` - JSON format OpenAPI specification
/// - `/swagger-ui` - Interactive Swagger UI documentation (if enabled)
#[derive(OpenApi)]
#[openapi(
    info(
        title = "workshop-dl REST API",
        version = "0.3.0",
        description = "REST API for a Steam Workshop download service: submit item URLs, poll job status, fetch produced archives, and stream structured logs.",
        license(name = "MIT")
    ),
    paths(
        crate::api::routes::submit_download,
        crate::api::routes::get_download,
        crate::api::routes::list_downloads,
        crate::api::routes::delete_download,
        crate::api::routes::fetch_archive,
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
    ),
    components(schemas(
        crate::types::JobId,
        crate::types::ItemId,
        crate::types::JobState,
        crate::types::SecondFactorKind,
        crate::types::WorkshopItem,
        crate::types::JobSnapshot,
        crate::types::SubmitReceipt,
        crate::logbus::LogLevel,
        crate::logbus::LogRecord,
        crate::error::ApiError,
        crate::error::ErrorDetail,
        crate::api::routes::SubmitRequest,
    )),
    tags(
        (name = "downloads", description = "Submission, status snapshots, and artifact delivery"),
        (name = "system", description = "Health checks and OpenAPI spec")
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Security addon describing the observer-token header for the admin surfaces
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = &mut openapi.components {
            components.add_security_scheme(
                "observer_token",
                utoipa::openapi::security::SecurityScheme::ApiKey(
                    utoipa::openapi::security::ApiKey::Header(
                        utoipa::openapi::security::ApiKeyValue::new("X-Observer-Token"),
                    ),
                ),
            );
        }
    }
}
