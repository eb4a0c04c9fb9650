//! ERP automation steps
//!
//! Each step drives a [`UiSession`](crate::driver::UiSession) through one
//! screen of the remote system and translates driver failures into the
//! step's own [`AutomationError`] variant.

use crate::error::{AutomationError, Error};

pub mod download;
pub mod export;
pub mod login;
pub mod navigation;
pub mod poller;

pub use download::Downloader;
pub use export::ExportSubmitter;
pub use login::AuthenticationStep;
pub use navigation::NavigationStep;
pub use poller::{ExportPoller, ExportStatus, PollPolicy, PollReport, SessionStatusSource, StatusSource};

/// Re-label a driver failure as a failure of the step that hit it
///
/// Signals with their own meaning (no invoices, cancellation, a more specific
/// automation error raised by a nested step) pass through untouched.
pub(crate) fn step_failure(error: Error, wrap: fn(String) -> AutomationError) -> Error {
    match error {
        Error::NoInvoices(_) => error,
        Error::Automation(AutomationError::ElementNotFound { locator }) => {
            Error::Automation(wrap(format!("element not found: {locator}")))
        }
        Error::Automation(AutomationError::Driver(message)) => Error::Automation(wrap(message)),
        Error::Automation(_) => error,
        other => Error::Automation(wrap(other.to_string())),
    }
}
