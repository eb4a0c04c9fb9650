//! Configuration types for nfe-harvester

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::Path, path::PathBuf, time::Duration};

/// Main configuration for the worker
///
/// Every section has working defaults, so an empty JSON object (or no file at
/// all) yields a usable local setup.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Staging, destination and selector file locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Browser session settings
    #[serde(default)]
    pub browser: BrowserConfig,

    /// Export completion polling
    #[serde(default)]
    pub poller: PollerConfig,

    /// Download completion detection
    #[serde(default)]
    pub download: DownloadConfig,

    /// Archive ingestion
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Fallback ERP credentials
    #[serde(default)]
    pub credentials: CredentialsConfig,

    /// Job queue connection
    #[serde(default)]
    pub queue: QueueConfig,

    /// Control-plane reporting
    #[serde(default)]
    pub control_plane: ControlPlaneConfig,

    /// Optional status API
    #[serde(default)]
    pub api: ApiConfig,

    /// Job store backing
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read {}: {}", path.display(), e),
            key: None,
        })?;

        let config: Config = serde_json::from_str(&raw).map_err(|e| Error::Config {
            message: format!("failed to parse {}: {}", path.display(), e),
            key: None,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the pipeline misbehave
    pub fn validate(&self) -> Result<()> {
        if self.paths.staging_dir == self.paths.destination_dir {
            return Err(config_error(
                "staging_dir",
                "staging and destination directories must differ",
            ));
        }
        if self.poller.interval.is_zero() {
            return Err(config_error("poller.interval", "must be greater than zero"));
        }
        if self.poller.interval > self.poller.timeout {
            return Err(config_error(
                "poller.interval",
                "must not exceed poller.timeout",
            ));
        }
        if self.browser.start_retry.max_attempts == 0 {
            return Err(config_error(
                "browser.start_retry.max_attempts",
                "at least one attempt is required",
            ));
        }
        if self.queue.connect_retry.max_attempts == 0 {
            return Err(config_error(
                "queue.connect_retry.max_attempts",
                "at least one attempt is required",
            ));
        }
        if self.ingest.max_descent_depth == 0 {
            return Err(config_error(
                "ingest.max_descent_depth",
                "must be greater than zero",
            ));
        }
        if self.ingest.archive_extensions.is_empty() {
            return Err(config_error(
                "ingest.archive_extensions",
                "at least one extension is required",
            ));
        }
        if self.download.stability_interval.is_zero() {
            return Err(config_error(
                "download.stability_interval",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

fn config_error(key: &str, message: &str) -> Error {
    Error::Config {
        message: format!("{key}: {message}"),
        key: Some(key.to_string()),
    }
}

/// File system locations
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root for per-job download staging (default: "downloads/pending")
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Root of the organized document tree (default: "downloads/processed")
    #[serde(default = "default_destination_dir")]
    pub destination_dir: PathBuf,

    /// YAML selector definitions (default: "config/selectors.yaml")
    #[serde(default = "default_selectors_file")]
    pub selectors_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            staging_dir: default_staging_dir(),
            destination_dir: default_destination_dir(),
            selectors_file: default_selectors_file(),
        }
    }
}

/// How delays grow between attempts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay every time
    Fixed,
    /// `initial_delay * attempt`
    Linear,
    /// `initial_delay * multiplier^(attempt - 1)`
    #[default]
    Exponential,
}

/// Retry configuration for transient failures
///
/// `max_attempts` counts every try, including the first one.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failure (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Upper bound for any delay (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Delay growth (default: exponential)
    #[serde(default)]
    pub strategy: BackoffStrategy,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            strategy: BackoffStrategy::Exponential,
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

/// Browser session settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// WebDriver endpoint (default: "http://localhost:9515")
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,

    /// Browser start attempts (default: 3 attempts, 2s x attempt)
    #[serde(default = "default_browser_retry")]
    pub start_retry: RetryConfig,

    /// How long to wait for an element (default: 30 seconds)
    #[serde(default = "default_element_timeout", with = "duration_serde")]
    pub element_timeout: Duration,

    /// Interval between element lookups while waiting, in milliseconds (default: 500)
    #[serde(default = "default_element_poll_interval_ms")]
    pub element_poll_interval_ms: u64,

    /// Window size passed to the browser (default: "1920,1080")
    #[serde(default = "default_window_size")]
    pub window_size: String,
}

impl BrowserConfig {
    /// Element lookup interval as a Duration
    pub fn element_poll_interval(&self) -> Duration {
        Duration::from_millis(self.element_poll_interval_ms)
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_url: default_webdriver_url(),
            start_retry: default_browser_retry(),
            element_timeout: default_element_timeout(),
            element_poll_interval_ms: default_element_poll_interval_ms(),
            window_size: default_window_size(),
        }
    }
}

/// Export completion polling
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Overall wait budget (default: 180 minutes)
    #[serde(default = "default_poll_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Sleep between observations (default: 30 seconds)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            timeout: default_poll_timeout(),
            interval: default_poll_interval(),
        }
    }
}

/// Download completion detection
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Maximum wait for a stable archive (default: 300 seconds)
    #[serde(default = "default_download_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Interval between size checks (default: 2 seconds)
    #[serde(default = "default_stability_interval", with = "duration_serde")]
    pub stability_interval: Duration,

    /// Suffixes of in-progress browser downloads
    #[serde(default = "default_partial_suffixes")]
    pub partial_suffixes: Vec<String>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout: default_download_timeout(),
            stability_interval: default_stability_interval(),
            partial_suffixes: default_partial_suffixes(),
        }
    }
}

/// Archive ingestion
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Maximum single-child descent (default: 10)
    #[serde(default = "default_max_descent_depth")]
    pub max_descent_depth: usize,

    /// Extensions treated as archives (default: ["zip"])
    #[serde(default = "default_archive_extensions")]
    pub archive_extensions: Vec<String>,

    /// Root elements that mark a fiscal invoice document
    #[serde(default = "default_xml_root_elements")]
    pub xml_root_elements: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_descent_depth: default_max_descent_depth(),
            archive_extensions: default_archive_extensions(),
            xml_root_elements: default_xml_root_elements(),
        }
    }
}

/// Fallback ERP credentials, used when neither the job nor the environment has them
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Account name
    #[serde(default)]
    pub username: Option<String>,

    /// Account password
    #[serde(default)]
    pub password: Option<String>,
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Job queue connection
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Redis URL (default: "redis://127.0.0.1:6379")
    #[serde(default = "default_queue_url")]
    pub url: String,

    /// List holding pending jobs (default: "automation_jobs")
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    /// List receiving rejected messages; None drops them
    #[serde(default = "default_dead_letter_queue")]
    pub dead_letter_queue: Option<String>,

    /// Initial connection attempts (default: 5 attempts, fixed 5s)
    #[serde(default = "default_connect_retry")]
    pub connect_retry: RetryConfig,

    /// Blocking wait per receive call (default: 5 seconds)
    #[serde(default = "default_queue_poll_timeout", with = "duration_serde")]
    pub poll_timeout: Duration,

    /// Identifier of this worker process
    #[serde(default = "default_worker_id")]
    pub worker_id: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            url: default_queue_url(),
            queue_name: default_queue_name(),
            dead_letter_queue: default_dead_letter_queue(),
            connect_retry: default_connect_retry(),
            poll_timeout: default_queue_poll_timeout(),
            worker_id: default_worker_id(),
        }
    }
}

/// Control-plane reporting
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    /// Base URL; None logs reports locally instead
    #[serde(default)]
    pub base_url: Option<String>,

    /// Per-request timeout (default: 10 seconds)
    #[serde(default = "default_control_plane_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Value sent as the Authorization header
    #[serde(default)]
    pub auth_header: Option<String>,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: default_control_plane_timeout(),
            auth_header: None,
        }
    }
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Serve the status API (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Address to bind to (default: 127.0.0.1:8080)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Enable Swagger UI at /swagger-ui (default: true)
    #[serde(default = "default_true")]
    pub swagger_ui: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: default_bind_address(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
            swagger_ui: true,
        }
    }
}

/// Job store backing
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite file; None keeps job records in memory
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("downloads/pending")
}

fn default_destination_dir() -> PathBuf {
    PathBuf::from("downloads/processed")
}

fn default_selectors_file() -> PathBuf {
    PathBuf::from("config/selectors.yaml")
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_webdriver_url() -> String {
    "http://localhost:9515".to_string()
}

fn default_browser_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(60),
        strategy: BackoffStrategy::Linear,
        backoff_multiplier: 1.0,
        jitter: false,
    }
}

fn default_element_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_element_poll_interval_ms() -> u64 {
    500
}

fn default_window_size() -> String {
    "1920,1080".to_string()
}

fn default_poll_timeout() -> Duration {
    Duration::from_secs(180 * 60) // 180 minutes
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_download_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_stability_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_partial_suffixes() -> Vec<String> {
    vec![".crdownload".into(), ".part".into(), ".tmp".into()]
}

fn default_max_descent_depth() -> usize {
    10
}

fn default_archive_extensions() -> Vec<String> {
    vec!["zip".into()]
}

fn default_xml_root_elements() -> Vec<String> {
    vec!["nfeProc".into(), "NFe".into()]
}

fn default_queue_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_queue_name() -> String {
    "automation_jobs".to_string()
}

fn default_dead_letter_queue() -> Option<String> {
    Some("automation_jobs:dead".to_string())
}

fn default_connect_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 5,
        initial_delay: Duration::from_secs(5),
        max_delay: Duration::from_secs(5),
        strategy: BackoffStrategy::Fixed,
        backoff_multiplier: 1.0,
        jitter: false,
    }
}

fn default_queue_poll_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_worker_id() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "nfe-worker".to_string())
}

fn default_control_plane_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".into()]
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
