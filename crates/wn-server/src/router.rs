//! Axum router construction.
//!
//! Builds the full application router with all routes, the upload body
//! limit, and the middleware layers.

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::context::AppContext;
use crate::middleware::request_id::request_id_middleware;
use crate::routes;

/// Allowance for multipart boundaries and part headers on top of the file
/// size cap.
const FORM_OVERHEAD: usize = 64 * 1024;

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::health::health_check,
        routes::normalize::normalize_upload,
        routes::stats::stats,
    ),
    components(schemas(
        routes::health::HealthResponse,
        routes::normalize::UploadForm,
        routes::normalize::NormalizeResponse,
        routes::normalize::OriginalFile,
        routes::normalize::NormalizedFile,
        routes::normalize::Processing,
        routes::stats::StatsResponse,
        routes::stats::QueueStats,
        routes::stats::WorkerStats,
        crate::stats::StatsSnapshot,
        crate::ingest::Status,
        crate::error::ErrorResponse,
        crate::error::ErrorBody,
    ))
)]
pub struct ApiDoc;

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = usize::try_from(ctx.config.normalize.max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(FORM_OVERHEAD);

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/v1/normalize", post(routes::normalize::normalize_upload))
        .route("/api/stats", get(routes::stats::stats))
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
