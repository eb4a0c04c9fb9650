//! Export completion polling
//!
//! The ERP generates exports asynchronously and lists them in a status table.
//! [`ExportPoller`] re-reads the status of the newest row until it reaches a
//! terminal state, the polling budget runs out, or the job is cancelled.

use crate::clock::Clock;
use crate::config::PollerConfig;
use crate::driver::UiSession;
use crate::driver::selectors::ExportPageSelectors;
use crate::error::{AutomationError, Error, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Classified export row status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportStatus {
    /// Queued, or not listed yet
    Pending,
    /// Being generated
    Processing,
    /// Ready to download
    Completed,
    /// The ERP gave up on the export
    Error,
    /// Text matched no known keyword
    Unknown,
}

impl ExportStatus {
    /// True for `Completed` and `Error`
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExportStatus::Completed | ExportStatus::Error)
    }
}

// Checked in this order; error keywords win over completion ("concluído com erro").
// Keywords match at the start of a word, so "disponivel" does not match "indisponivel".
const ERROR_KEYWORDS: &[&str] = &["erro", "falha", "error", "failed", "cancelad"];
// A negated status is never a completion ("não concluído", "indisponível")
const NEGATION_KEYWORDS: &[&str] = &[
    "nao",
    "not",
    "nenhum",
    "indisponiv",
    "incomplet",
    "unavailable",
];
const COMPLETED_KEYWORDS: &[&str] = &[
    "conclu",
    "finaliz",
    "disponivel",
    "processado",
    "gerado",
    "complete",
    "success",
    "done",
];
const PROCESSING_KEYWORDS: &[&str] = &[
    "processando",
    "em andamento",
    "executando",
    "gerando",
    "processing",
    "running",
];
const PENDING_KEYWORDS: &[&str] = &[
    "pendente",
    "aguardando",
    "na fila",
    "agendado",
    "pending",
    "queued",
    "waiting",
];

/// Map status text to an [`ExportStatus`], ignoring case and accents
pub fn classify_status(text: &str) -> ExportStatus {
    let folded = deunicode::deunicode(text).to_lowercase();
    let words: Vec<&str> = folded
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    if words.is_empty() {
        return ExportStatus::Unknown;
    }
    // Leading space so every keyword is anchored to a word start
    let normalized = format!(" {}", words.join(" "));

    let matches = |keywords: &[&str]| {
        keywords
            .iter()
            .any(|k| normalized.contains(&format!(" {k}")))
    };

    if matches(ERROR_KEYWORDS) {
        ExportStatus::Error
    } else if matches(NEGATION_KEYWORDS) {
        if matches(PROCESSING_KEYWORDS) {
            ExportStatus::Processing
        } else {
            ExportStatus::Pending
        }
    } else if matches(COMPLETED_KEYWORDS) {
        ExportStatus::Completed
    } else if matches(PROCESSING_KEYWORDS) {
        ExportStatus::Processing
    } else if matches(PENDING_KEYWORDS) {
        ExportStatus::Pending
    } else {
        ExportStatus::Unknown
    }
}

/// Polling budget
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    /// Give up once this much time has passed
    pub timeout: Duration,
    /// Pause between observations
    pub interval: Duration,
}

impl From<&PollerConfig> for PollPolicy {
    fn from(config: &PollerConfig) -> Self {
        Self {
            timeout: config.timeout,
            interval: config.interval,
        }
    }
}

/// Where the poller reads the export status from
#[async_trait]
pub trait StatusSource: Send {
    /// Raw status text of the tracked export, `None` when it is not listed yet
    async fn current_status(&mut self) -> Result<Option<String>>;

    /// Reload the status view before the next observation
    async fn refresh(&mut self) -> Result<()>;
}

/// Reads the newest row of the export table through a UI session
pub struct SessionStatusSource<'a> {
    session: &'a mut dyn UiSession,
    selectors: &'a ExportPageSelectors,
}

impl<'a> SessionStatusSource<'a> {
    #[allow(missing_docs)]
    pub fn new(session: &'a mut dyn UiSession, selectors: &'a ExportPageSelectors) -> Self {
        Self { session, selectors }
    }

    async fn read_in_frame(&mut self) -> Result<Option<String>> {
        self.session.enter_frame(&self.selectors.legado_frame).await?;
        let text = self.session.text_of(&self.selectors.status_cell).await;
        self.session.exit_frames().await?;
        text
    }
}

#[async_trait]
impl<'a> StatusSource for SessionStatusSource<'a> {
    async fn current_status(&mut self) -> Result<Option<String>> {
        self.read_in_frame().await
    }

    async fn refresh(&mut self) -> Result<()> {
        match &self.selectors.refresh_button {
            Some(button) => {
                self.session.enter_frame(&self.selectors.legado_frame).await?;
                let clicked = self.session.click(button).await;
                self.session.exit_frames().await?;
                clicked
            }
            None => self.session.refresh().await,
        }
    }
}

/// What the poller saw before it stopped
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollReport {
    /// Every classified observation, in order
    pub observations: Vec<ExportStatus>,
    /// Raw text of the last observation
    pub final_status: Option<String>,
}

/// Waits for an export to reach a terminal status
pub struct ExportPoller<'a> {
    policy: PollPolicy,
    clock: &'a dyn Clock,
}

impl<'a> ExportPoller<'a> {
    #[allow(missing_docs)]
    pub fn new(policy: PollPolicy, clock: &'a dyn Clock) -> Self {
        Self { policy, clock }
    }

    /// Poll `source` until the export completes
    ///
    /// A missing row counts as pending and a failed read as unknown; neither
    /// stops polling. An error status fails immediately with
    /// [`AutomationError::ExportFailed`]; running out of time fails with
    /// [`AutomationError::Timeout`]; cancellation during the pause fails with
    /// [`AutomationError::Cancelled`].
    pub async fn wait<S>(&self, source: &mut S, cancel: &CancellationToken) -> Result<PollReport>
    where
        S: StatusSource + ?Sized,
    {
        let started = self.clock.now();
        let mut report = PollReport {
            observations: Vec::new(),
            final_status: None,
        };

        info!(
            timeout_secs = self.policy.timeout.as_secs(),
            interval_secs = self.policy.interval.as_secs(),
            "waiting for the export to finish"
        );

        loop {
            let (status, raw) = match source.current_status().await {
                Ok(None) => (ExportStatus::Pending, None),
                Ok(Some(text)) => (classify_status(&text), Some(text)),
                Err(e) => {
                    warn!(error = %e, "could not read the export status");
                    (ExportStatus::Unknown, None)
                }
            };
            report.observations.push(status);
            report.final_status = raw.clone();

            let elapsed = self.clock.now().duration_since(started);
            debug!(?status, raw = ?raw, elapsed_secs = elapsed.as_secs(), "export status observed");

            match status {
                ExportStatus::Completed => {
                    info!(
                        observations = report.observations.len(),
                        elapsed_secs = elapsed.as_secs(),
                        "export completed"
                    );
                    return Ok(report);
                }
                ExportStatus::Error => {
                    return Err(Error::Automation(AutomationError::ExportFailed {
                        status: raw.unwrap_or_default(),
                    }));
                }
                ExportStatus::Pending | ExportStatus::Processing | ExportStatus::Unknown => {}
            }

            if elapsed >= self.policy.timeout {
                warn!(
                    elapsed_secs = elapsed.as_secs(),
                    last_status = ?status,
                    "export did not finish in time"
                );
                return Err(Error::Automation(AutomationError::Timeout {
                    waited_secs: elapsed.as_secs(),
                }));
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("export wait cancelled");
                    return Err(Error::Automation(AutomationError::Cancelled));
                }
                _ = self.clock.sleep(self.policy.interval) => {}
            }

            if let Err(e) = source.refresh().await {
                warn!(error = %e, "status view refresh failed");
            }
        }
    }
}
