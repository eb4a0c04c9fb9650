//! Sidebar navigation to the export screen.

use super::step_failure;
use crate::driver::selectors::{ExportPageSelectors, HomePageSelectors};
use crate::driver::UiSession;
use crate::error::{AutomationError, Result};
use std::time::Duration;
use tracing::info;

/// Opens Tax → Integration → Export from the sidebar
pub struct NavigationStep<'a> {
    home: &'a HomePageSelectors,
    export: &'a ExportPageSelectors,
    timeout: Duration,
}

impl<'a> NavigationStep<'a> {
    #[allow(missing_docs)]
    pub fn new(home: &'a HomePageSelectors, export: &'a ExportPageSelectors, timeout: Duration) -> Self {
        Self {
            home,
            export,
            timeout,
        }
    }

    /// Click through the menu and wait for the export frame to load
    pub async fn run(&self, session: &mut dyn UiSession) -> Result<()> {
        self.open_export_screen(session)
            .await
            .map_err(|e| step_failure(e, AutomationError::Navigation))?;
        info!("export screen open");
        Ok(())
    }

    async fn open_export_screen(&self, session: &mut dyn UiSession) -> Result<()> {
        for entry in [
            &self.home.sidebar_tax,
            &self.home.sidebar_tax_integration,
            &self.home.sidebar_tax_integration_export,
        ] {
            session.click(entry).await?;
        }
        session.wait_for(&self.export.legado_frame, self.timeout).await
    }
}
