//! Export filter form.

use super::poller::classify_status;
use super::step_failure;
use crate::clock::Clock;
use crate::driver::UiSession;
use crate::driver::selectors::ExportPageSelectors;
use crate::error::{AutomationError, Error, Result};
use crate::types::{JobParameters, format_br_date};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Message used when the ERP shows its "no data" notice without text
const DEFAULT_NO_DATA_MESSAGE: &str = "no invoices found for the requested filter";

/// Fills and submits the export filter inside the legacy frame
pub struct ExportSubmitter<'a> {
    selectors: &'a ExportPageSelectors,
    clock: &'a dyn Clock,
    timeout: Duration,
    poll_interval: Duration,
}

impl<'a> ExportSubmitter<'a> {
    /// `timeout` bounds the wait for the form's reaction after submitting
    pub fn new(
        selectors: &'a ExportPageSelectors,
        clock: &'a dyn Clock,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            selectors,
            clock,
            timeout,
            poll_interval,
        }
    }

    /// Submit the export request
    ///
    /// Returns [`Error::NoInvoices`] when the ERP rejects the filter as empty.
    pub async fn run(&self, session: &mut dyn UiSession, params: &JobParameters) -> Result<()> {
        session
            .enter_frame(&self.selectors.legado_frame)
            .await
            .map_err(|e| step_failure(e, AutomationError::ExportSubmission))?;

        let result = self
            .submit(session, params)
            .await
            .map_err(|e| step_failure(e, AutomationError::ExportSubmission));

        if let Err(e) = session.exit_frames().await {
            warn!(error = %e, "failed to leave the export frame");
        }

        result
    }

    async fn submit(&self, session: &mut dyn UiSession, params: &JobParameters) -> Result<()> {
        let page = self.selectors;

        session.click(&page.include_button).await?;

        session
            .select_option(&page.document_type_select, &params.document_type)
            .await?;
        session
            .select_option(&page.emitter_select, &params.emitter)
            .await?;
        session
            .select_option(&page.operation_type_select, &params.operation_type)
            .await?;
        session
            .select_option(&page.file_type_select, &params.file_type)
            .await?;
        session
            .select_option(&page.invoice_situation_select, &params.invoice_situation)
            .await?;

        session
            .fill(&page.start_date_input, &format_br_date(params.start_date))
            .await?;
        session
            .fill(&page.end_date_input, &format_br_date(params.end_date))
            .await?;

        for store in &params.stores {
            session.click(&page.store_option(*store)).await?;
            debug!(store, "store selected");
        }

        // Whatever the status row shows now belongs to an earlier export
        let previous = self.read_status(session).await?;

        session.click(&page.submit_button).await?;
        info!(
            document_type = %params.document_type,
            stores = params.stores.len(),
            "export request submitted"
        );

        self.await_acceptance(session, previous.as_deref()).await
    }

    async fn read_status(&self, session: &mut dyn UiSession) -> Result<Option<String>> {
        if !session.is_present(&self.selectors.status_cell).await? {
            return Ok(None);
        }
        let text = session.text_of(&self.selectors.status_cell).await?;
        Ok(Some(text.map(|t| t.trim().to_string()).unwrap_or_default()))
    }

    /// Wait until the ERP either lists the export or reports an empty filter
    ///
    /// A status row that changed since `previous` is the new export. An
    /// unchanged row is accepted only after the "no data" notice had
    /// [`ACCEPT_SETTLE_CHECKS`] chances to appear, and never when the earlier
    /// export had already finished.
    async fn await_acceptance(
        &self,
        session: &mut dyn UiSession,
        previous: Option<&str>,
    ) -> Result<()> {
        let page = self.selectors;
        let started = self.clock.now();
        let mut unchanged_checks = 0u32;

        loop {
            if session.is_present(&page.no_data_message).await? {
                let message = session
                    .text_of(&page.no_data_message)
                    .await?
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| DEFAULT_NO_DATA_MESSAGE.to_string());
                info!(%message, "ERP reported no invoices for the filter");
                return Err(Error::NoInvoices(message));
            }

            if let Some(current) = self.read_status(session).await? {
                match previous {
                    Some(previous) if previous == current => {
                        unchanged_checks += 1;
                        if unchanged_checks >= ACCEPT_SETTLE_CHECKS
                            && !classify_status(previous).is_terminal()
                        {
                            debug!(status = %current, "status row unchanged, accepting after settle");
                            return Ok(());
                        }
                    }
                    _ => return Ok(()),
                }
            }

            if self.clock.now().duration_since(started) >= self.timeout {
                return Err(Error::Automation(AutomationError::ExportSubmission(format!(
                    "export request not listed after {}s",
                    self.timeout.as_secs()
                ))));
            }

            self.clock.sleep(self.poll_interval).await;
        }
    }
}

/// Checks of an unchanged status row before it is taken as the new export
const ACCEPT_SETTLE_CHECKS: u32 = 3;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::test_helpers::{
        Script, ScriptedSession, actions, on_click, sample_selectors, set_absent, set_present,
        set_texts,
    };
    use chrono::NaiveDate;

    fn params() -> JobParameters {
        serde_json::from_value(serde_json::json!({
            "stores": [101, 202],
            "document_type": "NFe",
            "start_date": "01/03/2024",
            "end_date": "31/03/2024",
            "gms_login_url": "https://erp.example/login"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn submits_every_filter_inside_the_frame() {
        let selectors = sample_selectors();
        let page = &selectors.export_page;
        let script = Script::shared();
        set_absent(&script, &page.no_data_message);
        let mut session = ScriptedSession::new(script.clone());
        let clock = ManualClock::new();

        ExportSubmitter::new(page, &clock, Duration::from_secs(30), Duration::from_secs(1))
            .run(&mut session, &params())
            .await
            .unwrap();

        let log = actions(&script);
        assert_eq!(log.first().unwrap(), "frame iframe#legado");
        assert_eq!(log.last().unwrap(), "exit_frames");
        assert!(log.contains(&"select select[name='tipoDocumento']=NFe".to_string()));
        assert!(log.contains(&"select select[name='emitente']=Qualquer".to_string()));
        assert!(log.contains(&"fill #dataInicial=01/03/2024".to_string()));
        assert!(log.contains(&"click input[name='loja'][value='202']".to_string()));
        assert_eq!(params().start_date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    }

    #[tokio::test]
    async fn no_data_notice_ends_the_job_early() {
        let selectors = sample_selectors();
        let page = &selectors.export_page;
        let script = Script::shared();
        set_texts(&script, &page.no_data_message, &[Some(" Nenhum registro encontrado ")]);
        let mut session = ScriptedSession::new(script.clone());
        let clock = ManualClock::new();

        let err = ExportSubmitter::new(page, &clock, Duration::from_secs(30), Duration::from_secs(1))
            .run(&mut session, &params())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NoInvoices(ref m) if m == "Nenhum registro encontrado"));
        assert_eq!(actions(&script).last().unwrap(), "exit_frames");
    }

    #[tokio::test]
    async fn unlisted_export_times_out_as_submission_failure() {
        let selectors = sample_selectors();
        let page = &selectors.export_page;
        let script = Script::shared();
        set_absent(&script, &page.no_data_message);
        set_absent(&script, &page.status_cell);
        let mut session = ScriptedSession::new(script);
        let clock = ManualClock::new();

        let err = ExportSubmitter::new(page, &clock, Duration::from_secs(30), Duration::from_secs(1))
            .run(&mut session, &params())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Automation(AutomationError::ExportSubmission(_))
        ));
        assert_eq!(clock.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn earlier_export_row_does_not_hide_the_no_data_notice() {
        let selectors = sample_selectors();
        let page = &selectors.export_page;
        let script = Script::shared();
        set_texts(&script, &page.status_cell, &[Some("Concluído")]);
        set_absent(&script, &page.no_data_message);
        set_texts(&script, &page.no_data_message, &[Some("Nenhum registro encontrado")]);
        {
            let script_for_hook = script.clone();
            let no_data = page.no_data_message.clone();
            on_click(&script, &page.submit_button, move || {
                set_present(&script_for_hook, &no_data);
            });
        }
        let mut session = ScriptedSession::new(script.clone());
        let clock = ManualClock::new();

        let err = ExportSubmitter::new(page, &clock, Duration::from_secs(30), Duration::from_secs(1))
            .run(&mut session, &params())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NoInvoices(ref m) if m == "Nenhum registro encontrado"));
    }

    #[tokio::test]
    async fn finished_earlier_export_is_not_taken_as_the_new_one() {
        let selectors = sample_selectors();
        let page = &selectors.export_page;
        let script = Script::shared();
        set_absent(&script, &page.no_data_message);
        set_texts(&script, &page.status_cell, &[Some("Concluído")]);
        let mut session = ScriptedSession::new(script);
        let clock = ManualClock::new();

        let err = ExportSubmitter::new(page, &clock, Duration::from_secs(30), Duration::from_secs(1))
            .run(&mut session, &params())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Automation(AutomationError::ExportSubmission(_))
        ));
        assert_eq!(clock.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn new_row_is_accepted_once_the_status_changes() {
        let selectors = sample_selectors();
        let page = &selectors.export_page;
        let script = Script::shared();
        set_absent(&script, &page.no_data_message);
        set_texts(
            &script,
            &page.status_cell,
            &[Some("Concluído"), Some("Concluído"), Some("Pendente")],
        );
        let mut session = ScriptedSession::new(script);
        let clock = ManualClock::new();

        ExportSubmitter::new(page, &clock, Duration::from_secs(30), Duration::from_secs(1))
            .run(&mut session, &params())
            .await
            .unwrap();

        assert_eq!(clock.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn missing_store_checkbox_fails_the_submission() {
        let selectors = sample_selectors();
        let page = &selectors.export_page;
        let script = Script::shared();
        set_absent(&script, &page.store_option(202));
        let mut session = ScriptedSession::new(script.clone());
        let clock = ManualClock::new();

        let err = ExportSubmitter::new(page, &clock, Duration::from_secs(30), Duration::from_secs(1))
            .run(&mut session, &params())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Automation(AutomationError::ExportSubmission(ref m)) if m.contains("202")
        ));
        assert!(!actions(&script).contains(&"click #btnConfirmar".to_string()));
    }
}
