//! Element locators for the ERP screens, loaded from YAML.

use super::Locator;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Placeholder replaced by the store identifier in [`ExportPageSelectors::store_option`]
pub const STORE_PLACEHOLDER: &str = "{store}";

/// All locators the automation needs
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Selectors {
    /// Login screen
    pub login_page: LoginPageSelectors,
    /// Landing page after login
    pub home_page: HomePageSelectors,
    /// Export screen
    pub export_page: ExportPageSelectors,
}

/// Login screen locators
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoginPageSelectors {
    /// Account name input
    pub username_input: Locator,
    /// Password input
    pub password_input: Locator,
    /// Submit button
    pub login_button: Locator,
}

/// Landing page locators
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HomePageSelectors {
    /// Tax menu; its presence also proves the login worked
    pub sidebar_tax: Locator,
    /// Tax integration submenu
    pub sidebar_tax_integration: Locator,
    /// Export entry
    pub sidebar_tax_integration_export: Locator,
}

/// Export screen locators
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExportPageSelectors {
    /// Legacy iframe hosting the export screen
    pub legado_frame: Locator,
    /// Opens the new-export form
    pub include_button: Locator,
    /// Document type `<select>`
    pub document_type_select: Locator,
    /// Emitter `<select>`
    pub emitter_select: Locator,
    /// Operation type `<select>`
    pub operation_type_select: Locator,
    /// File type `<select>`
    pub file_type_select: Locator,
    /// Invoice situation `<select>`
    pub invoice_situation_select: Locator,
    /// Period start input
    pub start_date_input: Locator,
    /// Period end input
    pub end_date_input: Locator,
    /// Store checkbox, with `{store}` standing for the store id
    pub store_option: String,
    /// Confirms the form
    pub submit_button: Locator,
    /// Message shown when nothing matches the filter
    pub no_data_message: Locator,
    /// Status cell of the newest export row
    pub status_cell: Locator,
    /// Download link of the newest export row
    pub download_button: Locator,
    /// In-page refresh control; the page is reloaded when absent
    #[serde(default)]
    pub refresh_button: Option<Locator>,
}

impl ExportPageSelectors {
    /// Checkbox locator for one store
    pub fn store_option(&self, store: u64) -> Locator {
        Locator::new(self.store_option.replace(STORE_PLACEHOLDER, &store.to_string()))
    }
}

impl Selectors {
    /// Load and validate the selector file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("selector file {} unavailable: {}", path.display(), e),
            key: Some("selectors_file".to_string()),
        })?;
        Self::from_yaml(&raw)
    }

    /// Parse and validate selector YAML
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let selectors: Selectors = serde_yaml::from_str(raw).map_err(|e| Error::Config {
            message: format!("invalid selector definitions: {e}"),
            key: Some("selectors_file".to_string()),
        })?;
        selectors.validate()?;
        Ok(selectors)
    }

    /// Every locator must be non-blank and the store template must carry its placeholder
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("login_page.username_input", &self.login_page.username_input),
            ("login_page.password_input", &self.login_page.password_input),
            ("login_page.login_button", &self.login_page.login_button),
            ("home_page.sidebar_tax", &self.home_page.sidebar_tax),
            (
                "home_page.sidebar_tax_integration",
                &self.home_page.sidebar_tax_integration,
            ),
            (
                "home_page.sidebar_tax_integration_export",
                &self.home_page.sidebar_tax_integration_export,
            ),
            ("export_page.legado_frame", &self.export_page.legado_frame),
            ("export_page.include_button", &self.export_page.include_button),
            (
                "export_page.document_type_select",
                &self.export_page.document_type_select,
            ),
            ("export_page.emitter_select", &self.export_page.emitter_select),
            (
                "export_page.operation_type_select",
                &self.export_page.operation_type_select,
            ),
            ("export_page.file_type_select", &self.export_page.file_type_select),
            (
                "export_page.invoice_situation_select",
                &self.export_page.invoice_situation_select,
            ),
            ("export_page.start_date_input", &self.export_page.start_date_input),
            ("export_page.end_date_input", &self.export_page.end_date_input),
            ("export_page.submit_button", &self.export_page.submit_button),
            ("export_page.no_data_message", &self.export_page.no_data_message),
            ("export_page.status_cell", &self.export_page.status_cell),
            ("export_page.download_button", &self.export_page.download_button),
        ];

        for (key, locator) in required {
            if locator.is_empty() {
                return Err(Error::Config {
                    message: format!("selector '{key}' is empty"),
                    key: Some(key.to_string()),
                });
            }
        }

        if !self.export_page.store_option.contains(STORE_PLACEHOLDER) {
            return Err(Error::Config {
                message: format!("selector 'export_page.store_option' must contain {STORE_PLACEHOLDER}"),
                key: Some("export_page.store_option".to_string()),
            });
        }

        Ok(())
    }
}
