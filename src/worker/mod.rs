//! Queue consumer
//!
//! The [`Worker`] takes one message at a time from a [`JobQueue`], validates
//! it, reports the job lifecycle to a [`ControlPlane`], runs it through a
//! [`JobExecutor`] and mirrors everything into a [`JobStore`].
//!
//! Acknowledgement rules:
//! - any result returned by the executor, `failed` included, is acknowledged once
//! - malformed or invalid messages are rejected without requeue

use crate::error::{Error, Result};
use crate::runner::{JobExecutor, ProgressSink};
use crate::store::{JobRecord, JobStore, LogEntry};
use crate::types::{JobId, JobResult, JobStatus, LogLevel, ProgressUpdate};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub mod control_plane;
pub mod message;
pub mod queue;
pub mod redis_queue;

pub use control_plane::{ControlPlane, HttpControlPlane, LoggingControlPlane};
pub use message::{JobMessage, decode_message, encode_message};
pub use queue::{Delivery, JobQueue, MemoryQueue};
pub use redis_queue::RedisQueue;

/// What happened to one delivery
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// The job ran and the message was acknowledged
    Acknowledged(JobStatus),
    /// The message was unusable and rejected without requeue
    Rejected,
}

/// Forwards runner progress to the control plane and the store
struct JobReporter<'a> {
    control_plane: &'a dyn ControlPlane,
    store: &'a dyn JobStore,
}

impl JobReporter<'_> {
    async fn store_log(&self, job_id: &JobId, level: LogLevel, message: &str) {
        if let Err(e) = self
            .store
            .append_log(job_id, LogEntry::now(level, message))
            .await
        {
            warn!(%job_id, error = %e, "failed to store job log");
        }
    }
}

#[async_trait]
impl ProgressSink for JobReporter<'_> {
    async fn progress(&self, job_id: &JobId, update: &ProgressUpdate) {
        match self.store.get(job_id).await {
            Ok(Some(mut record)) => {
                record.apply_progress(update);
                if let Err(e) = self.store.set(record).await {
                    warn!(%job_id, error = %e, "failed to store job progress");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(%job_id, error = %e, "failed to load job record"),
        }

        let line = format!("[{}%] {}", update.progress, update.message);
        self.store_log(job_id, LogLevel::Info, &line).await;
        self.control_plane
            .log(job_id, LogLevel::Info, &update.message)
            .await;
    }

    async fn log(&self, job_id: &JobId, level: LogLevel, message: &str) {
        self.store_log(job_id, level, message).await;
        self.control_plane.log(job_id, level, message).await;
    }
}

/// Sequential queue consumer
#[derive(Clone)]
pub struct Worker {
    queue: Arc<dyn JobQueue>,
    executor: Arc<dyn JobExecutor>,
    control_plane: Arc<dyn ControlPlane>,
    store: Arc<dyn JobStore>,
    poll_timeout: Duration,
}

impl Worker {
    #[allow(missing_docs)]
    pub fn new(
        queue: Arc<dyn JobQueue>,
        executor: Arc<dyn JobExecutor>,
        control_plane: Arc<dyn ControlPlane>,
        store: Arc<dyn JobStore>,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            executor,
            control_plane,
            store,
            poll_timeout,
        }
    }

    /// Consume until `shutdown` is cancelled
    ///
    /// A job in flight when the token fires still finishes, is reported and
    /// acknowledged; only its export wait observes the token.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!("worker ready, waiting for jobs");

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = self.queue.next_delivery(self.poll_timeout) => next,
            };

            match next {
                Ok(Some(delivery)) => {
                    self.handle(&delivery, &shutdown).await;
                }
                Ok(None) => {}
                Err(e) => {
                    error!(error = %e, "failed to receive from the job queue");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_timeout) => {}
                    }
                }
            }
        }

        info!("worker stopped");
        Ok(())
    }

    /// Process one delivery end to end
    pub async fn handle(&self, delivery: &Delivery, cancel: &CancellationToken) -> Disposition {
        let message = match message::decode_message(&delivery.body) {
            Ok(message) => message,
            Err(e) => {
                self.reject_invalid(delivery, e).await;
                return Disposition::Rejected;
            }
        };

        let job_id = &message.job_id;
        info!(%job_id, tag = delivery.tag, "job received");

        let mut record = match self.store.get(job_id).await {
            Ok(Some(record)) => record,
            Ok(None) => JobRecord::queued(job_id.clone()),
            Err(e) => {
                warn!(%job_id, error = %e, "failed to load job record");
                JobRecord::queued(job_id.clone())
            }
        };
        record.start();
        self.save(record.clone()).await;

        self.control_plane.start(job_id, &message.parameters).await;

        let reporter = JobReporter {
            control_plane: self.control_plane.as_ref(),
            store: self.store.as_ref(),
        };
        let result = self
            .executor
            .execute(job_id, &message.parameters, &reporter, cancel)
            .await;

        let record = match self.store.get(job_id).await {
            Ok(Some(latest)) => latest,
            _ => record,
        };
        self.finish(record, &result).await;
        self.control_plane.finish(job_id, &result).await;

        if let Err(e) = self.queue.ack(delivery).await {
            error!(%job_id, tag = delivery.tag, error = %e, "failed to acknowledge delivery");
        } else {
            info!(%job_id, status = result.status.as_str(), "job acknowledged");
        }
        Disposition::Acknowledged(result.status)
    }

    async fn reject_invalid(&self, delivery: &Delivery, error: Error) {
        let job_id = message::peek_job_id(&delivery.body);
        error!(
            job_id = ?job_id.as_ref().map(JobId::as_str),
            tag = delivery.tag,
            error = %error,
            "rejecting invalid message"
        );

        if let Some(job_id) = &job_id {
            let now = Utc::now();
            let result = crate::runner::classify_failure(error).into_result(now, now);
            let record = match self.store.get(job_id).await {
                Ok(Some(record)) => record,
                _ => JobRecord::queued(job_id.clone()),
            };
            self.finish(record, &result).await;
            self.control_plane.finish(job_id, &result).await;
        }

        if let Err(e) = self.queue.reject(delivery).await {
            error!(tag = delivery.tag, error = %e, "failed to reject delivery");
        }
    }

    async fn finish(&self, mut record: JobRecord, result: &JobResult) {
        record.finish(result.clone());
        self.save(record).await;
    }

    async fn save(&self, record: JobRecord) {
        let job_id = record.job_id.clone();
        if let Err(e) = self.store.set(record).await {
            warn!(%job_id, error = %e, "failed to store job record");
        }
    }
}
