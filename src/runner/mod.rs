//! Job execution state machine
//!
//! [`JobRunner`] drives one job through every phase and always returns a
//! [`JobResult`]; failures become a `failed` result instead of an error. The
//! browser session is closed once on every path.

use crate::automation::{
    AuthenticationStep, Downloader, ExportPoller, ExportSubmitter, NavigationStep, PollPolicy,
    SessionStatusSource,
};
use crate::clock::Clock;
use crate::config::{Config, CredentialsConfig};
use crate::driver::{SessionOptions, Selectors, UiDriver, UiSession};
use crate::error::{AutomationError, Error, Result, ValidationError};
use crate::ingest::{ArchiveIngestor, IngestRequest};
use crate::retry::delay_for_attempt;
use crate::types::{
    AutomationFailureKind, Credentials, FiscalSummary, JobId, JobOutcome, JobParameters,
    JobResult, LogLevel, Phase, ProgressUpdate,
};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

/// Environment variable holding the fallback ERP user
pub const ENV_USER: &str = "GMS_USER";
/// Environment variable holding the fallback ERP password
pub const ENV_PASSWORD: &str = "GMS_PASSWORD";

/// Receives progress checkpoints and log lines while a job runs
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// A phase began
    async fn progress(&self, job_id: &JobId, update: &ProgressUpdate);

    /// A human-readable line for operators
    async fn log(&self, job_id: &JobId, level: LogLevel, message: &str);
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

#[async_trait]
impl ProgressSink for NoopProgress {
    async fn progress(&self, _job_id: &JobId, _update: &ProgressUpdate) {}

    async fn log(&self, _job_id: &JobId, _level: LogLevel, _message: &str) {}
}

/// Anything that can run a validated job to a result
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Run the job; never fails, failures are reported in the result
    async fn execute(
        &self,
        job_id: &JobId,
        params: &JobParameters,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> JobResult;
}

/// Resolve credentials: job parameters first, then the environment, then config
///
/// Each field falls back independently; blank values count as absent.
pub fn resolve_credentials(
    params: &JobParameters,
    config: &CredentialsConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Credentials> {
    let pick = |from_params: &Option<String>, var: &str, from_config: &Option<String>| {
        [from_params.clone(), env(var), from_config.clone()]
            .into_iter()
            .flatten()
            .find(|v| !v.trim().is_empty())
    };

    let username = pick(&params.username, ENV_USER, &config.username);
    let password = pick(&params.password, ENV_PASSWORD, &config.password);

    match (username, password) {
        (Some(username), Some(password)) => Ok(Credentials { username, password }),
        (username, password) => {
            let mut missing = Vec::new();
            if username.is_none() {
                missing.push("gms_user".to_string());
            }
            if password.is_none() {
                missing.push("gms_password".to_string());
            }
            Err(Error::Validation(ValidationError::MissingFields(missing)))
        }
    }
}

/// Runs jobs against the ERP through a [`UiDriver`]
#[derive(Clone)]
pub struct JobRunner {
    config: Arc<Config>,
    driver: Arc<dyn UiDriver>,
    selectors: Arc<Selectors>,
    clock: Arc<dyn Clock>,
}

impl JobRunner {
    #[allow(missing_docs)]
    pub fn new(
        config: Arc<Config>,
        driver: Arc<dyn UiDriver>,
        selectors: Arc<Selectors>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            driver,
            selectors,
            clock,
        }
    }

    /// Run one job to completion
    pub async fn run(
        &self,
        job_id: &JobId,
        params: &JobParameters,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> JobResult {
        let span = info_span!("job", job_id = %job_id);
        async move {
            let started_at = Utc::now();
            let mut session: Option<Box<dyn UiSession>> = None;

            let outcome = match self
                .execute_phases(job_id, params, sink, cancel, &mut session)
                .await
            {
                Ok(summary) => JobOutcome::Success(summary),
                Err(e) => classify_failure(e),
            };

            if let Some(mut session) = session.take()
                && let Err(e) = session.close().await
            {
                warn!(error = %e, "failed to close the browser session");
            }

            match &outcome {
                JobOutcome::Success(summary) => {
                    report(sink, job_id, Phase::Finished).await;
                    info!(valid = summary.valid_invoices_found, "job completed");
                }
                JobOutcome::NoInvoices(message) => {
                    info!(%message, "job completed without invoices");
                    sink.log(job_id, LogLevel::Info, message).await;
                    let staging = staging_dir(&self.config.paths.staging_dir, job_id);
                    match tokio::fs::remove_dir(&staging).await {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => warn!(?staging, error = %e, "job staging directory left in place"),
                    }
                }
                JobOutcome::AutomationFailure { kind, message } => {
                    warn!(?kind, error = %message, "job failed");
                    sink.log(job_id, LogLevel::Error, message).await;
                }
                JobOutcome::UnexpectedFailure(message) => {
                    error!(error = %message, "job failed with an unexpected error");
                    sink.log(job_id, LogLevel::Error, message).await;
                }
            }

            outcome.into_result(started_at, Utc::now())
        }
        .instrument(span)
        .await
    }

    async fn execute_phases(
        &self,
        job_id: &JobId,
        params: &JobParameters,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
        slot: &mut Option<Box<dyn UiSession>>,
    ) -> Result<FiscalSummary> {
        let browser = &self.config.browser;
        let selectors = &*self.selectors;
        let clock = &*self.clock;

        report(sink, job_id, Phase::Setup).await;
        validate_parameters(params)?;
        let credentials = resolve_credentials(params, &self.config.credentials, |key| {
            std::env::var(key).ok()
        })?;
        let staging = prepare_staging(&self.config.paths.staging_dir, job_id).await?;

        report(sink, job_id, Phase::BrowserStart).await;
        let options = SessionOptions {
            headless: params.headless,
            download_dir: staging.clone(),
        };
        let session = slot.insert(self.start_browser(&options).await?).as_mut();

        report(sink, job_id, Phase::Authenticate).await;
        AuthenticationStep::new(&selectors.login_page, &selectors.home_page, browser.element_timeout)
            .run(session, &params.login_url, &credentials)
            .await?;
        report(sink, job_id, Phase::Authenticated).await;

        report(sink, job_id, Phase::Navigate).await;
        NavigationStep::new(&selectors.home_page, &selectors.export_page, browser.element_timeout)
            .run(session)
            .await?;

        report(sink, job_id, Phase::SubmitExport).await;
        ExportSubmitter::new(
            &selectors.export_page,
            clock,
            browser.element_timeout,
            browser.element_poll_interval(),
        )
        .run(session, params)
        .await?;

        report(sink, job_id, Phase::AwaitCompletion).await;
        let poll_report = ExportPoller::new(PollPolicy::from(&self.config.poller), clock)
            .wait(
                &mut SessionStatusSource::new(session, &selectors.export_page),
                cancel,
            )
            .await?;
        info!(
            observations = poll_report.observations.len(),
            status = ?poll_report.final_status,
            "export ready"
        );

        report(sink, job_id, Phase::Download).await;
        let archive = Downloader::new(
            &selectors.export_page,
            &self.config.download,
            &self.config.ingest.archive_extensions,
            clock,
        )
        .run(session, &staging)
        .await?;
        sink.log(
            job_id,
            LogLevel::Info,
            &format!("downloaded {}", archive.display()),
        )
        .await;

        report(sink, job_id, Phase::Ingest).await;
        let summary = ArchiveIngestor::new(self.config.ingest.clone())
            .ingest(IngestRequest {
                staging_dir: staging.clone(),
                destination_root: self.config.paths.destination_dir.clone(),
                document_type: params.document_type.clone(),
                start_date: params.start_date,
                end_date: params.end_date,
            })
            .await?;

        // Job staging is empty after a clean ingestion
        if let Err(e) = tokio::fs::remove_dir(&staging).await {
            warn!(?staging, error = %e, "job staging directory left in place");
        }

        Ok(summary)
    }

    /// Start a session, retrying with backoff and cleaning up between attempts
    async fn start_browser(&self, options: &SessionOptions) -> Result<Box<dyn UiSession>> {
        let retry = &self.config.browser.start_retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.driver.start(options).await {
                Ok(session) => {
                    info!(attempt, "browser started");
                    return Ok(session);
                }
                Err(e) => {
                    warn!(attempt, max_attempts, error = %e, "browser start failed");
                    self.driver.cleanup_failed_start().await;
                    last_error = match e {
                        Error::Automation(AutomationError::BrowserStart { reason, .. }) => reason,
                        other => other.to_string(),
                    };
                    if attempt < max_attempts {
                        self.clock.sleep(delay_for_attempt(retry, attempt)).await;
                    }
                }
            }
        }

        Err(Error::Automation(AutomationError::BrowserStart {
            attempts: max_attempts,
            reason: last_error,
        }))
    }
}

#[async_trait]
impl JobExecutor for JobRunner {
    async fn execute(
        &self,
        job_id: &JobId,
        params: &JobParameters,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> JobResult {
        self.run(job_id, params, sink, cancel).await
    }
}

async fn report(sink: &dyn ProgressSink, job_id: &JobId, phase: Phase) {
    let update = ProgressUpdate::from(phase);
    info!(?phase, progress = update.progress, "{}", update.message);
    sink.progress(job_id, &update).await;
}

fn validate_parameters(params: &JobParameters) -> Result<()> {
    let mut missing = Vec::new();
    if params.stores.is_empty() {
        missing.push("stores".to_string());
    }
    if params.document_type.trim().is_empty() {
        missing.push("document_type".to_string());
    }
    if params.login_url.trim().is_empty() {
        missing.push("gms_login_url".to_string());
    }
    if !missing.is_empty() {
        return Err(Error::Validation(ValidationError::MissingFields(missing)));
    }

    if params.start_date > params.end_date {
        return Err(Error::Validation(ValidationError::InvalidField {
            field: "start_date".to_string(),
            reason: "must not be after end_date".to_string(),
        }));
    }
    Ok(())
}

/// Map a phase error to the job outcome
pub fn classify_failure(error: Error) -> JobOutcome {
    let message = error.to_string();
    match error {
        Error::NoInvoices(message) => JobOutcome::NoInvoices(message),
        Error::Automation(e) => JobOutcome::AutomationFailure {
            kind: e.kind(),
            message,
        },
        Error::Ingest(_) => JobOutcome::AutomationFailure {
            kind: AutomationFailureKind::Ingest,
            message,
        },
        Error::Validation(_) | Error::Config { .. } => JobOutcome::AutomationFailure {
            kind: AutomationFailureKind::Setup,
            message,
        },
        _ => JobOutcome::UnexpectedFailure(message),
    }
}

/// Per-job staging directory under `root`, always a direct child of it
pub(crate) fn staging_dir(root: &Path, job_id: &JobId) -> PathBuf {
    let name: String = job_id
        .as_str()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match name.as_str() {
        "" | "." | ".." => root.join("_"),
        _ => root.join(name),
    }
}

/// Create `{root}/{job_id}`, moving aside anything an earlier run left there
async fn prepare_staging(root: &Path, job_id: &JobId) -> Result<PathBuf> {
    let dir = staging_dir(root, job_id);
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if tokio::fs::try_exists(&dir).await? {
        let aside = root.join(format!(
            "{name}.stale-{}",
            Utc::now().format("%Y%m%d%H%M%S")
        ));
        warn!(?dir, ?aside, "staging directory exists, keeping it aside");
        tokio::fs::rename(&dir, &aside).await?;
    }

    tokio::fs::create_dir_all(&dir).await?;
    Ok(dir)
}
