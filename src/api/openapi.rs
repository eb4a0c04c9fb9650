//! OpenAPI documentation and schema generation

use utoipa::OpenApi;

/// OpenAPI documentation for the job status API
///
/// Served at `/openapi.json` and, when enabled, through Swagger UI at `/swagger-ui`.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "nfe-harvester REST API",
        version = "0.1.0",
        description = "Submit fiscal document export jobs and follow their progress"
    ),
    paths(
        // Jobs
        crate::api::routes::submit_job,
        crate::api::routes::list_jobs,
        crate::api::routes::get_job,
        crate::api::routes::get_job_logs,

        // System
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
    ),
    components(
        schemas(
            crate::types::JobId,
            crate::types::JobParameters,
            crate::types::JobResult,
            crate::types::JobStatus,
            crate::types::JobSummary,
            crate::types::FiscalSummary,
            crate::types::NoInvoicesSummary,
            crate::types::Issuer,
            crate::types::OperationCounts,
            crate::types::Phase,
            crate::types::LogLevel,
            crate::store::JobRecord,
            crate::store::JobState,
            crate::store::LogEntry,
            crate::api::routes::EnqueueResponse,
            crate::api::routes::LogsQuery,
            crate::error::ApiError,
            crate::error::ErrorDetail,
        )
    ),
    tags(
        (name = "jobs", description = "Job submission and status"),
        (name = "system", description = "Health and API documentation")
    )
)]
pub struct ApiDoc;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_lists_every_route() {
        let spec = serde_json::to_value(ApiDoc::openapi()).unwrap();
        let paths = spec["paths"].as_object().unwrap();
        for path in ["/jobs", "/jobs/{id}", "/jobs/{id}/logs", "/health", "/openapi.json"] {
            assert!(paths.contains_key(path), "missing {path}");
        }
        assert!(paths["/jobs"]["post"].is_object());
        assert!(spec["components"]["schemas"]["JobRecord"].is_object());
    }
}
