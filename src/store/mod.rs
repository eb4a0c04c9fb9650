//! Job state persistence
//!
//! The worker mirrors every job it handles into a [`JobStore`] so the status
//! API can answer without talking to the worker. Two backings exist:
//! - [`MemoryJobStore`]: process-local map, the default
//! - [`SqliteJobStore`]: survives restarts, selected by `persistence.database_path`

use crate::error::Result;
use crate::types::{JobId, JobResult, JobStatus, LogLevel, Phase, ProgressUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

mod memory;
mod sqlite;

pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;

/// Lifecycle state of a job as seen by the store
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Published, not picked up yet
    Queued,
    /// A worker is running it
    Running,
    /// Finished with a fiscal summary
    Completed,
    /// Finished, the filter matched nothing
    CompletedNoInvoices,
    /// Finished with an error
    Failed,
}

impl JobState {
    /// Column representation
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::CompletedNoInvoices => "completed_no_invoices",
            JobState::Failed => "failed",
        }
    }

    /// Whether the job can still change
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Queued | JobState::Running)
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobState::Queued),
            "running" => Ok(JobState::Running),
            "completed" => Ok(JobState::Completed),
            "completed_no_invoices" => Ok(JobState::CompletedNoInvoices),
            "failed" => Ok(JobState::Failed),
            other => Err(format!("unknown job state '{other}'")),
        }
    }
}

impl From<JobStatus> for JobState {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Completed => JobState::Completed,
            JobStatus::CompletedNoInvoices => JobState::CompletedNoInvoices,
            JobStatus::Failed => JobState::Failed,
        }
    }
}

/// Stored view of one job
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct JobRecord {
    /// Job identifier from the queue message
    pub job_id: JobId,
    /// Current state
    pub state: JobState,
    /// Last progress checkpoint (0-100)
    pub progress: u8,
    /// Last phase entered
    pub phase: Option<Phase>,
    /// Last progress line
    pub message: Option<String>,
    /// Final result once terminal
    pub result: Option<JobResult>,
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// When the record last changed
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Fresh record in the [`JobState::Queued`] state
    pub fn queued(job_id: JobId) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            state: JobState::Queued,
            progress: 0,
            phase: None,
            message: None,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mark the job as picked up by a worker
    pub fn start(&mut self) {
        self.state = JobState::Running;
        self.updated_at = Utc::now();
    }

    /// Record a phase transition
    pub fn apply_progress(&mut self, update: &ProgressUpdate) {
        self.phase = Some(update.phase);
        self.progress = update.progress;
        self.message = Some(update.message.clone());
        self.updated_at = Utc::now();
    }

    /// Record the terminal result
    pub fn finish(&mut self, result: JobResult) {
        self.state = result.status.into();
        if self.state != JobState::Failed {
            self.progress = 100;
        }
        self.result = Some(result);
        self.updated_at = Utc::now();
    }
}

/// One log line of a job
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LogEntry {
    /// When it was emitted
    pub timestamp: DateTime<Utc>,
    /// Severity
    pub level: LogLevel,
    /// Text
    pub message: String,
}

impl LogEntry {
    /// Entry stamped now
    pub fn now(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        }
    }
}

/// Storage for job records and their log lines
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Look up one job
    async fn get(&self, job_id: &JobId) -> Result<Option<JobRecord>>;

    /// Insert or replace a job record
    async fn set(&self, record: JobRecord) -> Result<()>;

    /// Every known job, most recently created first
    async fn list(&self) -> Result<Vec<JobRecord>>;

    /// Append a log line to a job
    async fn append_log(&self, job_id: &JobId, entry: LogEntry) -> Result<()>;

    /// Log lines of a job in emission order; `tail` keeps only the last N
    async fn logs(&self, job_id: &JobId, tail: Option<usize>) -> Result<Vec<LogEntry>>;
}
