//! Job handlers: submit, list, inspect, logs.

use super::{EnqueueResponse, LogsQuery};
use crate::api::AppState;
use crate::error::{Error, ValidationError};
use crate::store::{JobRecord, JobState};
use crate::types::JobId;
use crate::worker::message::{decode_message, encode_message};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::Value;

/// POST /jobs - Enqueue a job
///
/// The body is the job's parameter object, as it appears under `parameters`
/// in a queue message. A job id is generated.
#[utoipa::path(
    post,
    path = "/jobs",
    tag = "jobs",
    request_body(content = crate::types::JobParameters, description = "Export filter and session parameters"),
    responses(
        (status = 202, description = "Job queued", body = EnqueueResponse),
        (status = 400, description = "Missing or invalid parameters", body = crate::error::ApiError),
        (status = 503, description = "No job queue attached", body = crate::error::ApiError)
    )
)]
pub async fn submit_job(
    State(state): State<AppState>,
    Json(parameters): Json<Value>,
) -> Result<impl IntoResponse, Error> {
    let queue = state
        .queue
        .clone()
        .ok_or_else(|| Error::Queue("no job queue attached to this server".to_string()))?;

    if !parameters.is_object() {
        return Err(Error::Validation(ValidationError::Malformed(
            "request body must be a JSON object".to_string(),
        )));
    }

    let job_id = JobId::generate();
    let body = encode_message(&job_id, parameters)?;
    // Same checks the worker applies, so bad requests fail here instead of in the queue
    decode_message(&body)?;

    state.store.set(JobRecord::queued(job_id.clone())).await?;
    queue.publish(body).await?;

    tracing::info!(%job_id, "job queued via API");
    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            job_id,
            state: JobState::Queued,
        }),
    ))
}

/// GET /jobs - List known jobs, most recent first
#[utoipa::path(
    get,
    path = "/jobs",
    tag = "jobs",
    responses(
        (status = 200, description = "All known jobs", body = Vec<crate::store::JobRecord>),
        (status = 500, description = "Internal server error", body = crate::error::ApiError)
    )
)]
pub async fn list_jobs(State(state): State<AppState>) -> Result<impl IntoResponse, Error> {
    Ok(Json(state.store.list().await?))
}

/// GET /jobs/:id - One job's state, progress and result
#[utoipa::path(
    get,
    path = "/jobs/{id}",
    tag = "jobs",
    params(
        ("id" = String, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Job record", body = crate::store::JobRecord),
        (status = 404, description = "Job not found", body = crate::error::ApiError)
    )
)]
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let record = state
        .store
        .get(&JobId::new(id.clone()))
        .await?
        .ok_or(Error::NotFound(id))?;
    Ok(Json(record))
}

/// GET /jobs/:id/logs - Log lines of a job
#[utoipa::path(
    get,
    path = "/jobs/{id}/logs",
    tag = "jobs",
    params(
        ("id" = String, Path, description = "Job ID"),
        LogsQuery
    ),
    responses(
        (status = 200, description = "Log lines, oldest first", body = Vec<crate::store::LogEntry>),
        (status = 404, description = "Job not found", body = crate::error::ApiError)
    )
)]
pub async fn get_job_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<impl IntoResponse, Error> {
    let job_id = JobId::new(id.clone());
    if state.store.get(&job_id).await?.is_none() {
        return Err(Error::NotFound(id));
    }
    Ok(Json(state.store.logs(&job_id, query.tail).await?))
}
