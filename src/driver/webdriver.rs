//! W3C WebDriver adapter (chromedriver and compatible endpoints).

use super::{Locator, LocatorKind, SessionOptions, UiDriver, UiSession};
use crate::config::BrowserConfig;
use crate::error::{AutomationError, Error, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Key under which WebDriver returns element references
const ELEMENT_KEY: &str = "element-6066-11e4-a52f-4f4c6b4dc7a5";

/// Errors that mean "try again shortly" while waiting for a clickable element
const TRANSIENT_CLICK_ERRORS: [&str; 3] = [
    "element not interactable",
    "element click intercepted",
    "stale element reference",
];

/// Starts Chrome sessions through a WebDriver endpoint
#[derive(Clone, Debug)]
pub struct WebDriverClient {
    http: reqwest::Client,
    base: Url,
    config: BrowserConfig,
}

impl WebDriverClient {
    /// Create a client for the configured endpoint
    pub fn new(config: &BrowserConfig) -> Result<Self> {
        let mut raw = config.webdriver_url.clone();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let base = Url::parse(&raw).map_err(|e| Error::Config {
            message: format!("invalid WebDriver URL '{}': {}", config.webdriver_url, e),
            key: Some("browser.webdriver_url".to_string()),
        })?;

        Ok(Self {
            http: reqwest::Client::new(),
            base,
            config: config.clone(),
        })
    }

    fn capabilities(&self, options: &SessionOptions) -> Result<Value> {
        let download_dir = std::path::absolute(&options.download_dir)?;

        let mut args = vec![
            format!("--window-size={}", self.config.window_size),
            "--disable-gpu".to_string(),
            "--no-sandbox".to_string(),
        ];
        if options.headless {
            args.push("--headless=new".to_string());
        }

        Ok(json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": args,
                        "prefs": {
                            "download.default_directory": download_dir.to_string_lossy(),
                            "download.prompt_for_download": false,
                            "safebrowsing.enabled": true
                        }
                    }
                }
            }
        }))
    }
}

#[async_trait]
impl UiDriver for WebDriverClient {
    async fn start(&self, options: &SessionOptions) -> Result<Box<dyn UiSession>> {
        info!(
            endpoint = %self.base,
            headless = options.headless,
            download_dir = ?options.download_dir,
            "starting browser session"
        );

        let body = self.capabilities(options)?;
        let value = send(&self.http, &self.base, Method::POST, "session", Some(body), None)
            .await
            .map_err(|e| {
                Error::Automation(AutomationError::BrowserStart {
                    attempts: 1,
                    reason: e.to_string(),
                })
            })?;

        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::Automation(AutomationError::BrowserStart {
                    attempts: 1,
                    reason: "WebDriver response carried no sessionId".to_string(),
                })
            })?
            .to_string();

        debug!(%session_id, "browser session created");

        Ok(Box::new(WebDriverSession {
            http: self.http.clone(),
            base: self.base.clone(),
            session_id,
            element_timeout: self.config.element_timeout,
            poll_interval: self.config.element_poll_interval(),
            closed: false,
        }))
    }
}

/// An open WebDriver session
#[derive(Debug)]
pub struct WebDriverSession {
    http: reqwest::Client,
    base: Url,
    session_id: String,
    element_timeout: Duration,
    poll_interval: Duration,
    closed: bool,
}

impl WebDriverSession {
    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let path = if path.is_empty() {
            format!("session/{}", self.session_id)
        } else {
            format!("session/{}/{}", self.session_id, path)
        };
        send(&self.http, &self.base, method, &path, body, None).await
    }

    async fn find_once(&self, locator: &Locator) -> Result<String> {
        let value = self
            .command(Method::POST, "element", Some(locator_body(locator)))
            .await
            .map_err(|e| with_locator(e, locator))?;
        element_id(&value, locator)
    }

    async fn find(&self, locator: &Locator, timeout: Duration) -> Result<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.find_once(locator).await {
                Ok(id) => return Ok(id),
                Err(Error::Automation(AutomationError::ElementNotFound { .. }))
                    if tokio::time::Instant::now() < deadline =>
                {
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn element_command(&self, element: &str, action: &str, body: Value) -> Result<Value> {
        self.command(Method::POST, &format!("element/{element}/{action}"), Some(body))
            .await
    }
}

#[async_trait]
impl UiSession for WebDriverSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        info!(%url, "navigating");
        self.command(Method::POST, "url", Some(json!({ "url": url })))
            .await?;
        Ok(())
    }

    async fn fill(&mut self, locator: &Locator, text: &str) -> Result<()> {
        let element = self.find(locator, self.element_timeout).await?;
        self.element_command(&element, "clear", json!({})).await?;
        self.element_command(&element, "value", json!({ "text": text }))
            .await?;
        debug!(%locator, "text sent to element");
        Ok(())
    }

    async fn click(&mut self, locator: &Locator) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.element_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let element = self.find(locator, remaining).await?;
            match self.element_command(&element, "click", json!({})).await {
                Ok(_) => {
                    debug!(%locator, "clicked element");
                    return Ok(());
                }
                Err(Error::Automation(AutomationError::Driver(message)))
                    if is_transient_click_error(&message)
                        && tokio::time::Instant::now() < deadline =>
                {
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn select_option(&mut self, locator: &Locator, value: &str) -> Result<()> {
        let select = self.find(locator, self.element_timeout).await?;
        let option = Locator::new(format!(
            "option[value=\"{}\"]",
            value.replace('\\', "\\\\").replace('"', "\\\"")
        ));
        let found = self
            .element_command(&select, "element", locator_body(&option))
            .await
            .map_err(|e| with_locator(e, &option))?;
        let option_id = element_id(&found, &option)?;
        self.element_command(&option_id, "click", json!({})).await?;
        debug!(%locator, %value, "option selected");
        Ok(())
    }

    async fn wait_for(&mut self, locator: &Locator, timeout: Duration) -> Result<()> {
        self.find(locator, timeout).await.map(|_| ())
    }

    async fn is_present(&mut self, locator: &Locator) -> Result<bool> {
        match self.find_once(locator).await {
            Ok(_) => Ok(true),
            Err(Error::Automation(AutomationError::ElementNotFound { .. })) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn text_of(&mut self, locator: &Locator) -> Result<Option<String>> {
        let element = match self.find_once(locator).await {
            Ok(id) => id,
            Err(Error::Automation(AutomationError::ElementNotFound { .. })) => return Ok(None),
            Err(e) => return Err(e),
        };
        let value = self
            .command(Method::GET, &format!("element/{element}/text"), None)
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn enter_frame(&mut self, locator: &Locator) -> Result<()> {
        let frame = self.find(locator, self.element_timeout).await?;
        self.command(
            Method::POST,
            "frame",
            Some(json!({ "id": { ELEMENT_KEY: frame } })),
        )
        .await?;
        debug!(%locator, "entered frame");
        Ok(())
    }

    async fn exit_frames(&mut self) -> Result<()> {
        self.command(Method::POST, "frame", Some(json!({ "id": null })))
            .await?;
        Ok(())
    }

    async fn refresh(&mut self) -> Result<()> {
        self.command(Method::POST, "refresh", Some(json!({}))).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        info!(session_id = %self.session_id, "closing browser session");
        self.command(Method::DELETE, "", None).await?;
        Ok(())
    }
}

impl Drop for WebDriverSession {
    fn drop(&mut self) {
        if !self.closed {
            warn!(session_id = %self.session_id, "browser session dropped without close");
        }
    }
}

fn locator_body(locator: &Locator) -> Value {
    let using = match locator.kind() {
        LocatorKind::Css => "css selector",
        LocatorKind::XPath => "xpath",
    };
    json!({ "using": using, "value": locator.as_str() })
}

fn element_id(value: &Value, locator: &Locator) -> Result<String> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            Error::Automation(AutomationError::Driver(format!(
                "malformed element reference for {locator}"
            )))
        })
}

fn with_locator(error: Error, locator: &Locator) -> Error {
    match error {
        Error::Automation(AutomationError::ElementNotFound { .. }) => {
            Error::Automation(AutomationError::ElementNotFound {
                locator: locator.to_string(),
            })
        }
        other => other,
    }
}

fn is_transient_click_error(message: &str) -> bool {
    TRANSIENT_CLICK_ERRORS
        .iter()
        .any(|pattern| message.starts_with(pattern))
}

/// Send one WebDriver command and unwrap its `value`
async fn send(
    http: &reqwest::Client,
    base: &Url,
    method: Method,
    path: &str,
    body: Option<Value>,
    timeout: Option<Duration>,
) -> Result<Value> {
    let url = base.join(path).map_err(|e| {
        Error::Automation(AutomationError::Driver(format!("invalid command path {path}: {e}")))
    })?;

    let mut request = http.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }
    if let Some(timeout) = timeout {
        request = request.timeout(timeout);
    }

    let response = request
        .send()
        .await
        .map_err(|e| Error::Automation(AutomationError::Driver(e.to_string())))?;
    let status = response.status();
    let payload: Value = response
        .json()
        .await
        .map_err(|e| Error::Automation(AutomationError::Driver(e.to_string())))?;
    let value = payload.get("value").cloned().unwrap_or(Value::Null);

    if status.is_success() {
        return Ok(value);
    }

    let code = value
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    let message = value.get("message").and_then(Value::as_str).unwrap_or("");

    if code == "no such element" || code == "no such frame" {
        return Err(Error::Automation(AutomationError::ElementNotFound {
            locator: message.to_string(),
        }));
    }

    Err(Error::Automation(AutomationError::Driver(format!(
        "{code}: {message}"
    ))))
}
