//! # nfe-harvester
//!
//! Queue-driven worker that logs into a web ERP, requests a fiscal invoice
//! XML export, waits for it, downloads the archive and files the documents
//! under a per-period destination tree with a summary of what was found.
//!
//! ## Design Philosophy
//!
//! - **Library-first** - The `nfe-worker` binary only wires configuration to the library
//! - **Seams as traits** - Browser ([`driver::UiDriver`]), queue ([`worker::JobQueue`]),
//!   control plane ([`worker::ControlPlane`]), job store ([`store::JobStore`]) and
//!   time ([`clock::Clock`]) can all be swapped, which is how the tests run
//! - **Always a result** - Every job ends in exactly one [`JobResult`], failures included
//!
//! ## Quick Start
//!
//! ```no_run
//! use nfe_harvester::{Config, run_with_shutdown};
//! use nfe_harvester::driver::{Selectors, WebDriverClient};
//! use nfe_harvester::runner::JobRunner;
//! use nfe_harvester::store::MemoryJobStore;
//! use nfe_harvester::worker::{LoggingControlPlane, RedisQueue, Worker};
//! use nfe_harvester::clock::TokioClock;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(Config::default());
//!     let selectors = Arc::new(Selectors::load(&config.paths.selectors_file)?);
//!     let driver = Arc::new(WebDriverClient::new(&config.browser)?);
//!     let runner = JobRunner::new(config.clone(), driver, selectors, Arc::new(TokioClock));
//!
//!     let queue = RedisQueue::connect_with_retry(&config.queue).await?;
//!     let worker = Worker::new(
//!         Arc::new(queue),
//!         Arc::new(runner),
//!         Arc::new(LoggingControlPlane),
//!         Arc::new(MemoryJobStore::new()),
//!         config.queue.poll_timeout,
//!     );
//!
//!     run_with_shutdown(worker).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Export automation phases (login, navigation, export, polling, download)
pub mod automation;
/// Time source abstraction
pub mod clock;
/// Configuration types
pub mod config;
/// Browser driver abstraction and the WebDriver adapter
pub mod driver;
/// Error types
pub mod error;
/// Archive extraction and invoice filing
pub mod ingest;
/// Retry logic with backoff
pub mod retry;
/// Job state machine
pub mod runner;
/// Job state, progress and log persistence
pub mod store;
/// Core types
pub mod types;
/// Queue consumer, message codec and control-plane reporting
pub mod worker;

#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use config::Config;
pub use error::{
    ApiError, AutomationError, DatabaseError, Error, ErrorDetail, IngestError, Result,
    ToHttpStatus, ValidationError,
};
pub use runner::{JobExecutor, JobRunner, ProgressSink};
pub use store::{JobRecord, JobState, JobStore, MemoryJobStore, SqliteJobStore};
pub use types::{
    FiscalSummary, JobId, JobOutcome, JobParameters, JobResult, JobStatus, JobSummary, LogLevel,
    Phase, ProgressUpdate,
};
pub use worker::{JobQueue, MemoryQueue, RedisQueue, Worker};

use tokio_util::sync::CancellationToken;

/// Run the worker until a termination signal arrives.
///
/// The signal cancels the worker's shutdown token: no new message is taken,
/// and a job in flight finishes (its export wait fails fast) before this returns.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(worker: Worker) -> Result<()> {
    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));
    worker.run(shutdown).await
}

/// Cancel `token` once a termination signal is received
pub async fn cancel_on_signal(token: CancellationToken) {
    wait_for_signal().await;
    tracing::info!("shutting down, no new jobs will be taken");
    token.cancel();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
