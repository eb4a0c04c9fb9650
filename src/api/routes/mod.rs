//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`jobs`] - Job submission and status
//! - [`system`] - Health, OpenAPI

use serde::{Deserialize, Serialize};

mod jobs;
mod system;

pub use jobs::*;
pub use system::*;

/// Query parameters for GET /jobs/:id/logs
#[derive(Debug, Deserialize, Serialize, utoipa::IntoParams, utoipa::ToSchema)]
pub struct LogsQuery {
    /// Only return the last N lines
    pub tail: Option<usize>,
}

/// Response for POST /jobs
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct EnqueueResponse {
    /// Identifier generated for the new job
    pub job_id: crate::types::JobId,
    /// Always `queued`
    pub state: crate::store::JobState,
}
