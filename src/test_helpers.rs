//! Shared fixtures for unit tests: a scripted UI driver, sample selectors and
//! export archives.

use crate::driver::{Locator, SessionOptions, Selectors, UiDriver, UiSession};
use crate::error::{AutomationError, Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) const SAMPLE_SELECTORS: &str = r##"
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

pub(crate) fn sample_selectors() -> Selectors {
    Selectors::from_yaml(SAMPLE_SELECTORS).unwrap()
}

type ClickHook = Box<dyn FnMut() + Send>;

/// State shared between a test and the sessions it scripts
#[derive(Default)]
pub(crate) struct Script {
    pub actions: Vec<String>,
    pub absent: HashSet<String>,
    pub texts: HashMap<String, VecDeque<Option<String>>>,
    pub on_click: HashMap<String, ClickHook>,
    pub fail_starts: u32,
    pub starts: u32,
    pub closes: u32,
    pub fail_close: bool,
}

impl Script {
    pub fn shared() -> Arc<Mutex<Script>> {
        Arc::new(Mutex::new(Script::default()))
    }
}

pub(crate) fn set_absent(script: &Arc<Mutex<Script>>, locator: &Locator) {
    script.lock().unwrap().absent.insert(locator.to_string());
}

pub(crate) fn set_present(script: &Arc<Mutex<Script>>, locator: &Locator) {
    script.lock().unwrap().absent.remove(locator.as_str());
}

/// Text returned by successive `text_of` calls; the last entry repeats
pub(crate) fn set_texts(script: &Arc<Mutex<Script>>, locator: &Locator, texts: &[Option<&str>]) {
    script.lock().unwrap().texts.insert(
        locator.to_string(),
        texts.iter().map(|t| t.map(str::to_string)).collect(),
    );
}

pub(crate) fn on_click(
    script: &Arc<Mutex<Script>>,
    locator: &Locator,
    hook: impl FnMut() + Send + 'static,
) {
    script
        .lock()
        .unwrap()
        .on_click
        .insert(locator.to_string(), Box::new(hook));
}

pub(crate) fn actions(script: &Arc<Mutex<Script>>) -> Vec<String> {
    script.lock().unwrap().actions.clone()
}

pub(crate) struct ScriptedSession {
    script: Arc<Mutex<Script>>,
}

impl ScriptedSession {
    pub fn new(script: Arc<Mutex<Script>>) -> Self {
        Self { script }
    }

    fn record(&self, action: String) {
        self.script.lock().unwrap().actions.push(action);
    }

    fn require(&self, locator: &Locator) -> Result<()> {
        if self.script.lock().unwrap().absent.contains(locator.as_str()) {
            return Err(Error::Automation(AutomationError::ElementNotFound {
                locator: locator.to_string(),
            }));
        }
        Ok(())
    }
}

#[async_trait]
impl UiSession for ScriptedSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.record(format!("navigate {url}"));
        Ok(())
    }

    async fn fill(&mut self, locator: &Locator, text: &str) -> Result<()> {
        self.require(locator)?;
        self.record(format!("fill {locator}={text}"));
        Ok(())
    }

    async fn click(&mut self, locator: &Locator) -> Result<()> {
        self.require(locator)?;
        self.record(format!("click {locator}"));
        let hook = self.script.lock().unwrap().on_click.remove(locator.as_str());
        if let Some(mut hook) = hook {
            hook();
            self.script
                .lock()
                .unwrap()
                .on_click
                .insert(locator.to_string(), hook);
        }
        Ok(())
    }

    async fn select_option(&mut self, locator: &Locator, value: &str) -> Result<()> {
        self.require(locator)?;
        self.record(format!("select {locator}={value}"));
        Ok(())
    }

    async fn wait_for(&mut self, locator: &Locator, _timeout: Duration) -> Result<()> {
        self.require(locator)?;
        self.record(format!("wait {locator}"));
        Ok(())
    }

    async fn is_present(&mut self, locator: &Locator) -> Result<bool> {
        Ok(self.require(locator).is_ok())
    }

    async fn text_of(&mut self, locator: &Locator) -> Result<Option<String>> {
        if self.require(locator).is_err() {
            return Ok(None);
        }
        let mut script = self.script.lock().unwrap();
        let Some(queue) = script.texts.get_mut(locator.as_str()) else {
            return Ok(None);
        };
        if queue.len() > 1 {
            Ok(queue.pop_front().flatten())
        } else {
            Ok(queue.front().cloned().flatten())
        }
    }

    async fn enter_frame(&mut self, locator: &Locator) -> Result<()> {
        self.require(locator)?;
        self.record(format!("frame {locator}"));
        Ok(())
    }

    async fn exit_frames(&mut self) -> Result<()> {
        self.record("exit_frames".to_string());
        Ok(())
    }

    async fn refresh(&mut self) -> Result<()> {
        self.record("refresh".to_string());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let fail = {
            let mut script = self.script.lock().unwrap();
            script.closes += 1;
            script.actions.push("close".to_string());
            script.fail_close
        };
        if fail {
            return Err(Error::Automation(AutomationError::Driver(
                "session already gone".into(),
            )));
        }
        Ok(())
    }
}

pub(crate) struct ScriptedDriver {
    pub script: Arc<Mutex<Script>>,
}

#[async_trait]
impl UiDriver for ScriptedDriver {
    async fn start(&self, options: &SessionOptions) -> Result<Box<dyn UiSession>> {
        let fail = {
            let mut script = self.script.lock().unwrap();
            script.starts += 1;
            script
                .actions
                .push(format!("start headless={}", options.headless));
            script.starts <= script.fail_starts
        };
        if fail {
            return Err(Error::Automation(AutomationError::BrowserStart {
                attempts: 1,
                reason: "chromedriver not reachable".into(),
            }));
        }
        Ok(Box::new(ScriptedSession::new(self.script.clone())))
    }

    async fn cleanup_failed_start(&self) {
        self.script
            .lock()
            .unwrap()
            .actions
            .push("cleanup".to_string());
    }
}

/// Minimal NF-e document
pub(crate) fn invoice_xml(model: &str, tp_nf: &str, emitted: &str, cnpj: &str, name: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<nfeProc xmlns="http://www.portalfiscal.inf.br/nfe" versao="4.00">
  <NFe>
    <infNFe Id="NFe{cnpj}" versao="4.00">
      <ide>
        <cUF>35</cUF>
        <mod>{model}</mod>
        <dhEmi>{emitted}T10:15:00-03:00</dhEmi>
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

/// Write a zip holding `entries` (name, bytes)
pub(crate) fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default();
    for (name, bytes) in entries {
        if name.ends_with('/') {
            zip.add_directory(*name, options).unwrap();
        } else {
            zip.start_file(*name, options).unwrap();
            zip.write_all(bytes).unwrap();
        }
    }
    zip.finish().unwrap();
}

/// Write an export the way the ERP ships it: an outer zip holding `inner_name`,
/// which holds `entries`
pub(crate) fn write_export(outer: &Path, inner_name: &str, entries: &[(&str, &[u8])]) -> PathBuf {
    let scratch = tempfile::tempdir().unwrap();
    let inner = scratch.path().join(inner_name);
    std::fs::create_dir_all(inner.parent().unwrap()).unwrap();
    write_zip(&inner, entries);
    let inner_bytes = std::fs::read(&inner).unwrap();
    write_zip(outer, &[(inner_name, &inner_bytes)]);
    outer.to_path_buf()
}
