//! Core types for nfe-harvester

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use utoipa::ToSchema;

/// Unique identifier for a job, assigned by whoever enqueues it
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Create a JobId from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random JobId
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Login credentials for the remote ERP
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Account name
    pub username: String,
    /// Account password
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Filter and session parameters for one export job
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct JobParameters {
    /// Run the browser without a visible window
    #[serde(default = "default_true")]
    pub headless: bool,

    /// Store identifiers to include in the export (never empty)
    pub stores: Vec<u64>,

    /// Document type, e.g. "NFe" or "NFCe"
    pub document_type: String,

    /// Emitter filter
    #[serde(default = "default_any")]
    pub emitter: String,

    /// Operation type filter
    #[serde(default = "default_any")]
    pub operation_type: String,

    /// Exported file type
    #[serde(default = "default_file_type")]
    pub file_type: String,

    /// Invoice situation filter
    #[serde(default = "default_any")]
    pub invoice_situation: String,

    /// First day of the period
    #[serde(with = "br_date")]
    #[schema(value_type = String, example = "01/09/2024")]
    pub start_date: NaiveDate,

    /// Last day of the period (inclusive)
    #[serde(with = "br_date")]
    #[schema(value_type = String, example = "30/09/2024")]
    pub end_date: NaiveDate,

    /// Login page of the remote ERP
    #[serde(rename = "gms_login_url")]
    pub login_url: String,

    /// Account name; falls back to environment then configuration
    #[serde(default, rename = "gms_user", skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Account password; never serialized back out
    #[serde(default, rename = "gms_password", skip_serializing)]
    pub password: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_any() -> String {
    "Qualquer".to_string()
}

fn default_file_type() -> String {
    "XML".to_string()
}

/// Value used for the optional filters when the message omits them
pub const ANY_FILTER: &str = "Qualquer";

/// Day/month/year date format used by the ERP and the job messages
pub const BR_DATE_FORMAT: &str = "%d/%m/%Y";

/// Parse a `DD/MM/YYYY` date
pub fn parse_br_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), BR_DATE_FORMAT).ok()
}

/// Format a date as `DD/MM/YYYY`
pub fn format_br_date(date: NaiveDate) -> String {
    date.format(BR_DATE_FORMAT).to_string()
}

/// Serde adapter for `DD/MM/YYYY` dates
pub mod br_date {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize as `DD/MM/YYYY`
    pub fn serialize<S>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_br_date(*date))
    }

    /// Deserialize from `DD/MM/YYYY`
    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_br_date(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid date '{raw}'")))
    }
}

/// Terminal status of a job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Export downloaded and ingested
    Completed,
    /// The filter matched no invoices
    CompletedNoInvoices,
    /// Any failure
    Failed,
}

impl JobStatus {
    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Completed => "completed",
            JobStatus::CompletedNoInvoices => "completed_no_invoices",
            JobStatus::Failed => "failed",
        }
    }
}

/// Category of a recognized job failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AutomationFailureKind {
    /// Parameters, credentials or selectors unusable
    Setup,
    /// Browser never started
    BrowserStart,
    /// Login rejected or post-login marker absent
    Login,
    /// Menu navigation failed
    Navigation,
    /// Required element missing
    ElementNotFound,
    /// Export form not submitted
    ExportSubmission,
    /// Remote export ended in error
    ExportFailed,
    /// Export never finished
    Timeout,
    /// Artifact never arrived
    Download,
    /// Driver-level failure
    Driver,
    /// Cancelled by shutdown
    Cancelled,
    /// Archive ingestion failed
    Ingest,
}

/// Tagged outcome of one job run
#[derive(Clone, Debug, PartialEq)]
pub enum JobOutcome {
    /// Export ingested
    Success(FiscalSummary),
    /// Remote system reported no matching invoices
    NoInvoices(String),
    /// A failure the runner knows how to describe
    AutomationFailure {
        /// Failure category
        kind: AutomationFailureKind,
        /// Error message
        message: String,
    },
    /// Anything else
    UnexpectedFailure(String),
}

impl JobOutcome {
    /// Status this outcome reports as
    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Success(_) => JobStatus::Completed,
            JobOutcome::NoInvoices(_) => JobStatus::CompletedNoInvoices,
            JobOutcome::AutomationFailure { .. } | JobOutcome::UnexpectedFailure(_) => {
                JobStatus::Failed
            }
        }
    }

    /// Build the final result envelope
    pub fn into_result(self, started_at: DateTime<Utc>, completed_at: DateTime<Utc>) -> JobResult {
        let status = self.status();
        let (summary, error) = match self {
            JobOutcome::Success(summary) => (Some(JobSummary::Fiscal(summary)), None),
            JobOutcome::NoInvoices(message) => {
                (Some(JobSummary::NoInvoices(NoInvoicesSummary::new(message))), None)
            }
            JobOutcome::AutomationFailure { message, .. } => (None, Some(non_empty(message))),
            JobOutcome::UnexpectedFailure(message) => (None, Some(non_empty(message))),
        };

        let duration_seconds = (completed_at - started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        JobResult {
            status,
            started_at,
            completed_at,
            duration_seconds,
            summary,
            error,
        }
    }
}

fn non_empty(message: String) -> String {
    if message.trim().is_empty() {
        "unknown error".to_string()
    } else {
        message
    }
}

/// Final record of one job run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct JobResult {
    /// Terminal status
    pub status: JobStatus,
    /// When the runner started
    pub started_at: DateTime<Utc>,
    /// When the runner finished
    pub completed_at: DateTime<Utc>,
    /// Wall-clock duration
    pub duration_seconds: f64,
    /// Present for `completed` and `completed_no_invoices`
    pub summary: Option<JobSummary>,
    /// Present for `failed`
    pub error: Option<String>,
}

/// Summary attached to a successful job
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum JobSummary {
    /// Aggregated invoice metadata
    Fiscal(FiscalSummary),
    /// Early exit because nothing matched
    NoInvoices(NoInvoicesSummary),
}

/// Summary for jobs whose filter matched nothing
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct NoInvoicesSummary {
    /// Always `concluido_sem_notas`
    pub status: String,
    /// Message shown by the remote system
    pub message: String,
}

impl NoInvoicesSummary {
    /// Wrap the remote system's message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: "concluido_sem_notas".to_string(),
            message: message.into(),
        }
    }
}

/// Invoice issuer, keyed by tax id
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Issuer {
    /// CNPJ or CPF
    pub tax_id: String,
    /// First name seen for this tax id
    pub name: String,
}

/// Invoice counts by operation nature
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OperationCounts {
    /// Inbound invoices (`tpNF` 0)
    pub entry: usize,
    /// Outbound invoices (`tpNF` 1)
    pub exit: usize,
}

/// Aggregated metadata for the invoice XML files of one export
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FiscalSummary {
    /// Every `.xml` file found under the document root
    pub total_xml_files_analyzed: usize,
    /// Files that parsed as fiscal invoices
    pub valid_invoices_found: usize,
    /// Files skipped for a wrong root element or a parse error
    pub invalid_or_ignored_files: usize,
    /// Counts keyed by document model ("55", "65")
    pub by_model: BTreeMap<String, usize>,
    /// Counts by operation nature
    pub by_operation: OperationCounts,
    /// Distinct emission dates (`YYYY-MM-DD`), sorted
    pub emission_dates: Vec<String>,
    /// Distinct issuers in first-seen order
    pub issuers: Vec<Issuer>,
    /// Where the documents were relocated
    #[schema(value_type = Option<String>)]
    pub destination: Option<PathBuf>,
}

/// Pipeline phase with its progress checkpoint
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Validating parameters and resources
    Setup,
    /// Starting the browser
    BrowserStart,
    /// Logging in
    Authenticate,
    /// Login verified
    Authenticated,
    /// Opening the export screen
    Navigate,
    /// Filling and submitting the export form
    SubmitExport,
    /// Polling the export status
    AwaitCompletion,
    /// Downloading the export
    Download,
    /// Extracting and relocating
    Ingest,
    /// Done
    Finished,
}

impl Phase {
    /// Progress percentage reported when the phase begins
    pub fn progress(&self) -> u8 {
        match self {
            Phase::Setup => 5,
            Phase::BrowserStart => 10,
            Phase::Authenticate => 20,
            Phase::Authenticated => 30,
            Phase::Navigate => 40,
            Phase::SubmitExport => 50,
            Phase::AwaitCompletion => 60,
            Phase::Download => 70,
            Phase::Ingest => 80,
            Phase::Finished => 100,
        }
    }

    /// Human-readable progress line
    pub fn message(&self) -> &'static str {
        match self {
            Phase::Setup => "Preparing the environment",
            Phase::BrowserStart => "Starting the browser",
            Phase::Authenticate => "Logging in",
            Phase::Authenticated => "Login succeeded",
            Phase::Navigate => "Opening the export screen",
            Phase::SubmitExport => "Submitting the export request",
            Phase::AwaitCompletion => "Waiting for the export to finish",
            Phase::Download => "Downloading the exported files",
            Phase::Ingest => "Extracting and organizing the downloaded files",
            Phase::Finished => "File processing finished",
        }
    }
}

/// Severity of a job log line sent to the control plane
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Diagnostic detail
    Debug,
    /// Normal progress
    Info,
    /// Recoverable problem
    Warning,
    /// Failure
    Error,
}

impl LogLevel {
    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" | "WARN" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

/// One progress report emitted by the runner
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProgressUpdate {
    /// Phase being entered
    pub phase: Phase,
    /// Percentage checkpoint of that phase
    pub progress: u8,
    /// Line to show to operators
    pub message: String,
}

impl From<Phase> for ProgressUpdate {
    fn from(phase: Phase) -> Self {
        Self {
            phase,
            progress: phase.progress(),
            message: phase.message().to_string(),
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn sample_parameters_json() -> serde_json::Value {
        serde_json::json!({
            "stores": [101, 102],
            "document_type": "NFe",
            "start_date": "01/09/2024",
            "end_date": "30/09/2024",
            "gms_login_url": "https://erp.example.com/login",
            "gms_password": "secret"
        })
    }

    #[test]
    fn parameters_fill_defaults_for_optional_filters() {
        let params: JobParameters = serde_json::from_value(sample_parameters_json()).unwrap();
        assert!(params.headless);
        assert_eq!(params.emitter, "Qualquer");
        assert_eq!(params.operation_type, "Qualquer");
        assert_eq!(params.invoice_situation, "Qualquer");
        assert_eq!(params.file_type, "XML");
        assert_eq!(params.start_date, NaiveDate::from_ymd_opt(2024, 9, 1).unwrap());
    }

    #[test]
    fn parameters_never_serialize_the_password() {
        let params: JobParameters = serde_json::from_value(sample_parameters_json()).unwrap();
        let json = serde_json::to_value(&params).unwrap();
        assert!(json.get("gms_password").is_none());
        assert_eq!(json["start_date"], "01/09/2024");
    }

    #[test]
    fn credentials_debug_redacts_password() {
        let creds = Credentials {
            username: "bot".into(),
            password: "hunter2".into(),
        };
        let printed = format!("{creds:?}");
        assert!(printed.contains("bot"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn br_date_is_day_month_year_only() {
        assert_eq!(
            parse_br_date(" 05/09/2024 "),
            NaiveDate::from_ymd_opt(2024, 9, 5)
        );
        assert_eq!(parse_br_date("2024-09-05"), None);
        assert_eq!(parse_br_date("31/02/2024"), None);
        assert_eq!(parse_br_date("yesterday"), None);
    }

    #[test]
    fn phase_progress_is_monotonic() {
        let phases = [
            Phase::Setup,
            Phase::BrowserStart,
            Phase::Authenticate,
            Phase::Authenticated,
            Phase::Navigate,
            Phase::SubmitExport,
            Phase::AwaitCompletion,
            Phase::Download,
            Phase::Ingest,
            Phase::Finished,
        ];
        let values: Vec<u8> = phases.iter().map(Phase::progress).collect();
        assert_eq!(values, vec![5, 10, 20, 30, 40, 50, 60, 70, 80, 100]);
    }

    #[test]
    fn every_outcome_populates_exactly_one_of_summary_and_error() {
        let started = Utc::now();
        let completed = started + ChronoDuration::seconds(3);
        let outcomes = vec![
            JobOutcome::Success(FiscalSummary::default()),
            JobOutcome::NoInvoices("Nenhum registro encontrado".into()),
            JobOutcome::AutomationFailure {
                kind: AutomationFailureKind::Login,
                message: "login failed".into(),
            },
            JobOutcome::UnexpectedFailure(String::new()),
        ];

        for outcome in outcomes {
            let expected = outcome.status();
            let result = outcome.into_result(started, completed);
            assert_eq!(result.status, expected);
            assert_ne!(result.summary.is_some(), result.error.is_some());
            match result.status {
                JobStatus::Failed => assert!(!result.error.unwrap().is_empty()),
                _ => assert!(result.summary.is_some()),
            }
            assert!((result.duration_seconds - 3.0).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn no_invoices_summary_uses_fixed_status_tag() {
        let result = JobOutcome::NoInvoices("nada".into()).into_result(Utc::now(), Utc::now());
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "completed_no_invoices");
        assert_eq!(json["summary"]["status"], "concluido_sem_notas");
        assert_eq!(json["summary"]["message"], "nada");
    }

    #[test]
    fn job_summary_round_trips_both_shapes() {
        let fiscal = JobSummary::Fiscal(FiscalSummary {
            total_xml_files_analyzed: 2,
            valid_invoices_found: 1,
            ..Default::default()
        });
        let back: JobSummary =
            serde_json::from_str(&serde_json::to_string(&fiscal).unwrap()).unwrap();
        assert_eq!(back, fiscal);

        let empty = JobSummary::NoInvoices(NoInvoicesSummary::new("x"));
        let back: JobSummary =
            serde_json::from_str(&serde_json::to_string(&empty).unwrap()).unwrap();
        assert_eq!(back, empty);
    }
}
