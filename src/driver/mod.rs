//! Browser automation capability
//!
//! The pipeline talks to the remote ERP only through [`UiDriver`] and
//! [`UiSession`]. [`webdriver::WebDriverClient`] is the production adapter;
//! tests plug in scripted sessions.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub mod selectors;
pub mod webdriver;

pub use selectors::Selectors;
pub use webdriver::WebDriverClient;

/// How a locator string is interpreted
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocatorKind {
    /// CSS selector
    Css,
    /// XPath expression
    XPath,
}

/// Element locator; strings starting with `/` or `(` are XPath, anything else CSS
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locator(String);

impl Locator {
    /// Wrap a selector string
    pub fn new(selector: impl Into<String>) -> Self {
        Self(selector.into())
    }

    /// Selector text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// CSS or XPath, decided by the first character
    pub fn kind(&self) -> LocatorKind {
        let trimmed = self.0.trim_start();
        if trimmed.starts_with('/') || trimmed.starts_with('(') {
            LocatorKind::XPath
        } else {
            LocatorKind::Css
        }
    }

    /// True when the selector is blank
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Locator {
    fn from(selector: &str) -> Self {
        Self::new(selector)
    }
}

/// Per-session browser options
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionOptions {
    /// Run without a visible window
    pub headless: bool,
    /// Where the browser saves downloads
    pub download_dir: PathBuf,
}

/// Starts browser sessions
#[async_trait]
pub trait UiDriver: Send + Sync {
    /// Open a new session
    async fn start(&self, options: &SessionOptions) -> Result<Box<dyn UiSession>>;

    /// Release anything a failed `start` may have left behind
    async fn cleanup_failed_start(&self) {}
}

/// One open browser session
#[async_trait]
pub trait UiSession: Send {
    /// Load a URL in the current window
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Replace the content of an input
    async fn fill(&mut self, locator: &Locator, text: &str) -> Result<()>;

    /// Click an element once it accepts clicks
    async fn click(&mut self, locator: &Locator) -> Result<()>;

    /// Choose the `<option>` with the given value inside a `<select>`
    async fn select_option(&mut self, locator: &Locator, value: &str) -> Result<()>;

    /// Wait until the element exists
    async fn wait_for(&mut self, locator: &Locator, timeout: Duration) -> Result<()>;

    /// Check for the element without waiting
    async fn is_present(&mut self, locator: &Locator) -> Result<bool>;

    /// Visible text of the element, `None` when it does not exist
    async fn text_of(&mut self, locator: &Locator) -> Result<Option<String>>;

    /// Switch into an iframe
    async fn enter_frame(&mut self, locator: &Locator) -> Result<()>;

    /// Return to the top-level document
    async fn exit_frames(&mut self) -> Result<()>;

    /// Reload the current page
    async fn refresh(&mut self) -> Result<()>;

    /// End the session
    async fn close(&mut self) -> Result<()>;
}
