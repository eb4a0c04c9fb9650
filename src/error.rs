//! Error types for nfe-harvester
//!
//! This module provides the error handling for the library, including:
//! - Domain-specific error types (automation, ingestion, validation, storage)
//! - HTTP status code mapping for the status API
//! - Structured error responses with machine-readable error codes

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use utoipa::ToSchema;

use crate::types::AutomationFailureKind;

/// Result type alias for nfe-harvester operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for nfe-harvester
///
/// Each variant includes the context needed to diagnose a failed job from its
/// `error` string alone.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "selectors_file")
        key: Option<String>,
    },

    /// A job request is missing fields or carries invalid values
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The remote system reported that the filter matched no invoices
    #[error("no invoices found: {0}")]
    NoInvoices(String),

    /// Browser automation failed
    #[error("automation error: {0}")]
    Automation(#[from] AutomationError),

    /// Archive ingestion failed
    #[error("ingestion error: {0}")]
    Ingest(#[from] IngestError),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Redis transport error
    #[error("queue error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Queue protocol error (unknown delivery, closed queue, ...)
    #[error("queue error: {0}")]
    Queue(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Job not found
    #[error("job not found: {0}")]
    NotFound(String),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parse error (selector definitions)
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Job request validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    /// One or more required fields are absent or empty
    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    /// A field is present but its value is unusable
    #[error("invalid value for {field}: {reason}")]
    InvalidField {
        /// Name of the offending field
        field: String,
        /// Why the value was rejected
        reason: String,
    },

    /// The message body could not be decoded at all
    #[error("malformed message: {0}")]
    Malformed(String),
}

/// Browser automation errors
#[derive(Debug, Error)]
pub enum AutomationError {
    /// The browser session could not be started
    #[error("browser failed to start after {attempts} attempts: {reason}")]
    BrowserStart {
        /// Number of start attempts made
        attempts: u32,
        /// Error from the last attempt
        reason: String,
    },

    /// Login did not reach the post-login page
    #[error("login failed: {0}")]
    Login(String),

    /// Navigation to the export screen failed
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// A required element never appeared
    #[error("element not found: {locator}")]
    ElementNotFound {
        /// Locator that was searched for
        locator: String,
    },

    /// The export filter form could not be submitted
    #[error("export submission failed: {0}")]
    ExportSubmission(String),

    /// The remote system marked the export as failed
    #[error("export finished with error status '{status}'")]
    ExportFailed {
        /// Raw status text shown by the remote system
        status: String,
    },

    /// The export did not finish within the polling budget
    #[error("export did not complete within {waited_secs} seconds")]
    Timeout {
        /// Seconds spent waiting
        waited_secs: u64,
    },

    /// The export artifact was not downloaded
    #[error("download failed: {0}")]
    Download(String),

    /// The UI driver itself reported an error
    #[error("driver error: {0}")]
    Driver(String),

    /// The job was cancelled while waiting
    #[error("cancelled while waiting for the export")]
    Cancelled,
}

impl AutomationError {
    /// Coarse category used in job outcomes
    pub fn kind(&self) -> AutomationFailureKind {
        match self {
            AutomationError::BrowserStart { .. } => AutomationFailureKind::BrowserStart,
            AutomationError::Login(_) => AutomationFailureKind::Login,
            AutomationError::Navigation(_) => AutomationFailureKind::Navigation,
            AutomationError::ElementNotFound { .. } => AutomationFailureKind::ElementNotFound,
            AutomationError::ExportSubmission(_) => AutomationFailureKind::ExportSubmission,
            AutomationError::ExportFailed { .. } => AutomationFailureKind::ExportFailed,
            AutomationError::Timeout { .. } => AutomationFailureKind::Timeout,
            AutomationError::Download(_) => AutomationFailureKind::Download,
            AutomationError::Driver(_) => AutomationFailureKind::Driver,
            AutomationError::Cancelled => AutomationFailureKind::Cancelled,
        }
    }
}

/// Archive ingestion errors
#[derive(Debug, Error)]
pub enum IngestError {
    /// No downloaded archive in the staging directory
    #[error("no archive found in {dir}")]
    ArchiveNotFound {
        /// Directory that was scanned
        dir: PathBuf,
    },

    /// The outer archive did not contain a nested archive
    #[error("no inner archive found in {dir}")]
    InnerArchiveNotFound {
        /// Directory that was scanned
        dir: PathBuf,
    },

    /// Archive could not be opened or read
    #[error("extraction failed for {archive}: {reason}")]
    ExtractionFailed {
        /// The archive file that failed to extract
        archive: PathBuf,
        /// The reason extraction failed
        reason: String,
    },

    /// Single-child descent did not reach a document root
    #[error("unexpected folder structure under {path}: no document root within {depth} levels")]
    UnexpectedStructure {
        /// Directory where descent started
        path: PathBuf,
        /// Maximum descent depth
        depth: usize,
    },

    /// Relocating extracted content failed
    #[error("failed to move {source_path} to {dest_path}: {reason}")]
    MoveFailed {
        /// The source path being moved
        source_path: PathBuf,
        /// The destination path
        dest_path: PathBuf,
        /// The reason the move failed
        reason: String,
    },

    /// A computed path is unusable
    #[error("invalid path {path}: {reason}")]
    InvalidPath {
        /// The invalid path
        path: PathBuf,
        /// The reason the path is invalid
        reason: String,
    },
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// API error response format
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "not_found",
///     "message": "job not found: 1f0c...",
///     "details": { "job_id": "1f0c..." }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "validation_error")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }

    /// Create an "internal server error"
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - invalid input
            Error::Config { .. } => 400,
            Error::Validation(_) => 400,

            // 404 Not Found
            Error::NotFound(_) => 404,

            // 422 Unprocessable Entity - the job ran but its input produced nothing usable
            Error::NoInvoices(_) => 422,
            Error::Ingest(_) => 422,

            // 500 Internal Server Error
            Error::Database(_) => 500,
            Error::Sqlx(_) => 500,
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::Yaml(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Other(_) => 500,

            // 502 Bad Gateway - the remote ERP or an upstream service failed
            Error::Automation(_) => 502,
            Error::Network(_) => 502,

            // 503 Service Unavailable
            Error::Redis(_) => 503,
            Error::Queue(_) => 503,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Validation(e) => match e {
                ValidationError::MissingFields(_) => "missing_fields",
                ValidationError::InvalidField { .. } => "invalid_field",
                ValidationError::Malformed(_) => "malformed_message",
            },
            Error::NoInvoices(_) => "no_invoices",
            Error::Automation(e) => match e {
                AutomationError::BrowserStart { .. } => "browser_start_failed",
                AutomationError::Login(_) => "login_failed",
                AutomationError::Navigation(_) => "navigation_failed",
                AutomationError::ElementNotFound { .. } => "element_not_found",
                AutomationError::ExportSubmission(_) => "export_submission_failed",
                AutomationError::ExportFailed { .. } => "export_failed",
                AutomationError::Timeout { .. } => "export_timeout",
                AutomationError::Download(_) => "download_failed",
                AutomationError::Driver(_) => "driver_error",
                AutomationError::Cancelled => "cancelled",
            },
            Error::Ingest(e) => match e {
                IngestError::ArchiveNotFound { .. } => "archive_not_found",
                IngestError::InnerArchiveNotFound { .. } => "inner_archive_not_found",
                IngestError::ExtractionFailed { .. } => "extraction_failed",
                IngestError::UnexpectedStructure { .. } => "unexpected_structure",
                IngestError::MoveFailed { .. } => "move_failed",
                IngestError::InvalidPath { .. } => "invalid_path",
            },
            Error::Database(_) => "database_error",
            Error::Sqlx(_) => "database_error",
            Error::Redis(_) => "queue_error",
            Error::Queue(_) => "queue_error",
            Error::Io(_) => "io_error",
            Error::NotFound(_) => "not_found",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::Yaml(_) => "yaml_error",
            Error::ApiServerError(_) => "api_server_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({ "key": key })),
            Error::NotFound(job_id) => Some(serde_json::json!({ "job_id": job_id })),
            Error::Validation(ValidationError::MissingFields(fields)) => {
                Some(serde_json::json!({ "fields": fields }))
            }
            Error::Validation(ValidationError::InvalidField { field, reason }) => {
                Some(serde_json::json!({ "field": field, "reason": reason }))
            }
            Error::Ingest(IngestError::ExtractionFailed { archive, .. }) => {
                Some(serde_json::json!({ "archive": archive }))
            }
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
