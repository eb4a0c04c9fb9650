//! Queue worker binary
//!
//! Environment:
//! - `NFE_CONFIG` - JSON configuration file (default `config/worker.json`; defaults when absent)
//! - `NFE_LOG_FORMAT=json` - JSON log lines instead of the human-readable format
//! - `RUST_LOG` - log filter (default `info`)
//! - `GMS_USER` / `GMS_PASSWORD` - ERP credentials when jobs do not carry them

use nfe_harvester::api::{AppState, start_api_server};
use nfe_harvester::clock::TokioClock;
use nfe_harvester::driver::{Selectors, WebDriverClient};
use nfe_harvester::store::{JobStore, MemoryJobStore, SqliteJobStore};
use nfe_harvester::worker::{ControlPlane, HttpControlPlane, JobQueue, LoggingControlPlane};
use nfe_harvester::{Config, JobRunner, RedisQueue, Result, Worker, cancel_on_signal};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CONFIG_PATH: &str = "config/worker.json";

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "worker failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let json = std::env::var("NFE_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn load_config() -> Result<Config> {
    let path = std::env::var("NFE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    if path.exists() {
        info!(path = %path.display(), "loading configuration");
        Config::from_file(&path)
    } else {
        warn!(path = %path.display(), "configuration file not found, using defaults");
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }
}

async fn run() -> Result<()> {
    let config = Arc::new(load_config()?);

    let selectors = Arc::new(Selectors::load(&config.paths.selectors_file)?);
    let driver = Arc::new(WebDriverClient::new(&config.browser)?);
    let runner = JobRunner::new(config.clone(), driver, selectors, Arc::new(TokioClock));

    let store: Arc<dyn JobStore> = match &config.persistence.database_path {
        Some(path) => {
            info!(path = %path.display(), "using SQLite job store");
            Arc::new(SqliteJobStore::new(path).await?)
        }
        None => Arc::new(MemoryJobStore::new()),
    };

    let control_plane: Arc<dyn ControlPlane> = if config.control_plane.base_url.is_some() {
        Arc::new(HttpControlPlane::new(
            &config.control_plane,
            config.queue.worker_id.clone(),
        )?)
    } else {
        info!("no control plane configured, lifecycle events go to the log");
        Arc::new(LoggingControlPlane)
    };

    let queue: Arc<dyn JobQueue> = Arc::new(RedisQueue::connect_with_retry(&config.queue).await?);

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let api = if config.api.enabled {
        let state = AppState::new(store.clone(), Some(queue.clone()), config.clone());
        let shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = start_api_server(state, shutdown).await {
                error!(error = %e, "API server failed");
            }
        }))
    } else {
        None
    };

    let worker = Worker::new(
        queue,
        Arc::new(runner),
        control_plane,
        store,
        config.queue.poll_timeout,
    );
    let outcome = worker.run(shutdown.clone()).await;

    shutdown.cancel();
    if let Some(api) = api
        && let Err(e) = api.await
    {
        warn!(error = %e, "API server task ended abnormally");
    }

    outcome
}
