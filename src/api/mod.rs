//! REST API server module
//!
//! Optional HTTP surface over the job store: submit jobs to the queue and
//! follow their state, progress and logs.

use crate::Result;
use axum::{
    Router,
    http::HeaderValue,
    routing::get,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

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
/// ## Jobs
/// - `POST /jobs` - Enqueue a job (202 with the generated id)
/// - `GET /jobs` - List jobs
/// - `GET /jobs/:id` - Get one job
/// - `GET /jobs/:id/logs?tail=N` - Job log lines
///
/// ## System
/// - `GET /health` - Health check
/// - `GET /openapi.json` - OpenAPI specification
/// - `GET /swagger-ui` - Interactive documentation (if enabled)
pub fn create_router(state: AppState) -> Router {
    let api = state.config.api.clone();

    let router = Router::new()
        // Jobs
        .route("/jobs", get(routes::list_jobs).post(routes::submit_job))
        .route("/jobs/:id", get(routes::get_job))
        .route("/jobs/:id/logs", get(routes::get_job_logs))
        // System
        .route("/health", get(routes::health_check))
        .route("/openapi.json", get(routes::openapi_spec));

    // SwaggerUi registers its own spec route; keep it off /openapi.json
    let router = if api.swagger_ui {
        router.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
    } else {
        router
    };

    let router = router.with_state(state).layer(TraceLayer::new_for_http());

    if api.cors_enabled {
        router.layer(build_cors_layer(&api.cors_origins))
    } else {
        router
    }
}

/// Build a CORS layer based on configured origins
///
/// `"*"` (or an empty list) allows any origin.
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

/// Serve the API on the configured bind address until `shutdown` is cancelled
pub async fn start_api_server(state: AppState, shutdown: CancellationToken) -> Result<()> {
    let bind_address = state.config.api.bind_address;

    tracing::info!(address = %bind_address, "Starting API server");

    let app = create_router(state);

    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!(
        address = %listener.local_addr().map_err(crate::error::Error::Io)?,
        "API server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
