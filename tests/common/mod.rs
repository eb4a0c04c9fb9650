//! Shared fixtures for the integration tests: an in-process fake ERP behind
//! the public driver traits, export archives and a worker configuration.

#![allow(dead_code)]

use async_trait::async_trait;
use nfe_harvester::driver::{Locator, SessionOptions, Selectors, UiDriver, UiSession};
use nfe_harvester::error::{AutomationError, Error, Result};
use nfe_harvester::Config;
use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const SELECTORS: &str = r##"
login_page:
  username_input: "#usuario"
  password_input: "#senha"
  login_button: "//button[@type='submit']"
home_page:
  sidebar_tax: "#menu-fiscal"
  sidebar_tax_integration: "#menu-fiscal-integracao"
  sidebar_tax_integration_export: "#menu-fiscal-exportacao"
export_page:
  legado_frame: "iframe#legado"
  include_button: "#btnIncluir"
  document_type_select: "select[name='tipoDocumento']"
  emitter_select: "select[name='emitente']"
  operation_type_select: "select[name='tipoOperacao']"
  file_type_select: "select[name='tipoArquivo']"
  invoice_situation_select: "select[name='situacao']"
  start_date_input: "#dataInicial"
  end_date_input: "#dataFinal"
  store_option: "input[name='loja'][value='{store}']"
  submit_button: "#btnConfirmar"
  no_data_message: ".mensagem-sem-dados"
  status_cell: "(//table[@id='exportacoes']//tr)[2]/td[5]"
  download_button: "(//table[@id='exportacoes']//tr)[2]//a[contains(@class,'download')]"
"##;

pub fn selectors() -> Selectors {
    Selectors::from_yaml(SELECTORS).unwrap()
}

/// What the fake ERP does, and what it saw
#[derive(Debug, Default)]
pub struct ErpState {
    /// Password that opens the home page
    pub password: String,
    /// Text of the "no data" notice; `None` means the export gets listed
    pub no_data: Option<String>,
    /// Status cell readings, the last one repeats
    pub statuses: VecDeque<String>,
    /// Archive saved to the download directory when the download link is clicked
    pub export: Option<Vec<u8>>,
    /// Sessions opened
    pub sessions: u32,
    /// Sessions closed
    pub closed: u32,
    /// Values typed into inputs, in order
    pub typed: Vec<(String, String)>,
    /// Store checkboxes clicked
    pub stores_clicked: Vec<String>,
    /// Export request submitted; the status row is listed from then on
    pub submitted: bool,
}

/// In-process stand-in for the ERP web UI
#[derive(Clone, Default)]
pub struct FakeErp {
    pub state: Arc<Mutex<ErpState>>,
}

impl FakeErp {
    pub fn new(password: &str) -> Self {
        let erp = Self::default();
        erp.state.lock().unwrap().password = password.to_string();
        erp
    }

    /// Export listed, processing, then finished with `archive` ready to download
    pub fn with_export(self, archive: Vec<u8>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.statuses = ["Processando", "Processando", "Concluído"]
                .into_iter()
                .map(String::from)
                .collect();
            state.export = Some(archive);
        }
        self
    }

    /// The filter matches nothing
    pub fn with_no_data(self, notice: &str) -> Self {
        self.state.lock().unwrap().no_data = Some(notice.to_string());
        self
    }

    /// The export request ends in an error status
    pub fn with_status(self, status: &str) -> Self {
        self.state.lock().unwrap().statuses = VecDeque::from([status.to_string()]);
        self
    }
}

#[async_trait]
impl UiDriver for FakeErp {
    async fn start(&self, options: &SessionOptions) -> Result<Box<dyn UiSession>> {
        self.state.lock().unwrap().sessions += 1;
        Ok(Box::new(FakeSession {
            state: self.state.clone(),
            selectors: selectors(),
            download_dir: options.download_dir.clone(),
            typed_password: None,
            logged_in: false,
        }))
    }
}

struct FakeSession {
    state: Arc<Mutex<ErpState>>,
    selectors: Selectors,
    download_dir: PathBuf,
    typed_password: Option<String>,
    logged_in: bool,
}

#[async_trait]
impl UiSession for FakeSession {
    async fn navigate(&mut self, _url: &str) -> Result<()> {
        Ok(())
    }

    async fn fill(&mut self, locator: &Locator, text: &str) -> Result<()> {
        if *locator == self.selectors.login_page.password_input {
            self.typed_password = Some(text.to_string());
        }
        self.state
            .lock()
            .unwrap()
            .typed
            .push((locator.to_string(), text.to_string()));
        Ok(())
    }

    async fn click(&mut self, locator: &Locator) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if *locator == self.selectors.login_page.login_button {
            self.logged_in = self.typed_password.as_deref() == Some(state.password.as_str());
        } else if *locator == self.selectors.export_page.download_button {
            let Some(bytes) = state.export.clone() else {
                return Err(Error::Automation(AutomationError::ElementNotFound {
                    locator: locator.to_string(),
                }));
            };
            std::fs::create_dir_all(&self.download_dir)?;
            std::fs::write(self.download_dir.join("documentos.zip"), bytes)?;
        } else if *locator == self.selectors.export_page.submit_button {
            state.submitted = true;
        } else if locator.as_str().starts_with("input[name='loja']") {
            state.stores_clicked.push(locator.to_string());
        }
        Ok(())
    }

    async fn select_option(&mut self, _locator: &Locator, _value: &str) -> Result<()> {
        Ok(())
    }

    async fn wait_for(&mut self, locator: &Locator, _timeout: Duration) -> Result<()> {
        if *locator == self.selectors.home_page.sidebar_tax && !self.logged_in {
            return Err(Error::Automation(AutomationError::ElementNotFound {
                locator: locator.to_string(),
            }));
        }
        Ok(())
    }

    async fn is_present(&mut self, locator: &Locator) -> Result<bool> {
        if *locator == self.selectors.export_page.no_data_message {
            return Ok(self.state.lock().unwrap().no_data.is_some());
        }
        if *locator == self.selectors.export_page.status_cell {
            return Ok(self.state.lock().unwrap().submitted);
        }
        Ok(true)
    }

    async fn text_of(&mut self, locator: &Locator) -> Result<Option<String>> {
        let mut state = self.state.lock().unwrap();
        if *locator == self.selectors.export_page.no_data_message {
            return Ok(state.no_data.clone());
        }
        if *locator == self.selectors.export_page.status_cell {
            if !state.submitted {
                return Ok(None);
            }
            let text = if state.statuses.len() > 1 {
                state.statuses.pop_front()
            } else {
                state.statuses.front().cloned()
            };
            return Ok(text);
        }
        Ok(None)
    }

    async fn enter_frame(&mut self, _locator: &Locator) -> Result<()> {
        Ok(())
    }

    async fn exit_frames(&mut self) -> Result<()> {
        Ok(())
    }

    async fn refresh(&mut self) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.state.lock().unwrap().closed += 1;
        Ok(())
    }
}

/// Minimal NF-e document
pub fn invoice_xml(model: &str, tp_nf: &str, emitted: &str, cnpj: &str, name: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<nfeProc xmlns="http://www.portalfiscal.inf.br/nfe" versao="4.00">
  <NFe>
    <infNFe Id="NFe{cnpj}" versao="4.00">
      <ide>
        <mod>{model}</mod>
        <dhEmi>{emitted}T09:30:00-03:00</dhEmi>
        <tpNF>{tp_nf}</tpNF>
      </ide>
      <emit>
        <CNPJ>{cnpj}</CNPJ>
        <xNome>{name}</xNome>
      </emit>
    </infNFe>
  </NFe>
</nfeProc>
"#
    )
}

fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::FileOptions::default();
    for (name, bytes) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(bytes).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// An export as the ERP ships it: an outer zip holding one inner zip
pub fn export_archive(inner_name: &str, entries: &[(&str, &[u8])]) -> Vec<u8> {
    let inner = zip_bytes(entries);
    zip_bytes(&[(inner_name, &inner)])
}

/// Configuration rooted in a temp dir with fast polling
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.paths.staging_dir = root.join("pending");
    config.paths.destination_dir = root.join("processed");
    config.poller.interval = Duration::from_secs(30);
    config.browser.element_poll_interval_ms = 10;
    config
}

pub fn temp_root() -> TempDir {
    tempfile::tempdir().unwrap()
}

/// Control plane that remembers every event as a line
#[derive(Default)]
pub struct RecordingControlPlane {
    pub events: Mutex<Vec<String>>,
}

impl RecordingControlPlane {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl nfe_harvester::worker::ControlPlane for RecordingControlPlane {
    async fn start(&self, job_id: &nfe_harvester::JobId, _params: &nfe_harvester::JobParameters) {
        self.events.lock().unwrap().push(format!("start {job_id}"));
    }

    async fn log(
        &self,
        job_id: &nfe_harvester::JobId,
        level: nfe_harvester::LogLevel,
        message: &str,
    ) {
        self.events
            .lock()
            .unwrap()
            .push(format!("log {job_id} {} {message}", level.as_str()));
    }

    async fn finish(&self, job_id: &nfe_harvester::JobId, result: &nfe_harvester::JobResult) {
        self.events
            .lock()
            .unwrap()
            .push(format!("finish {job_id} {}", result.status.as_str()));
    }
}
