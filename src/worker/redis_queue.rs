//! Redis reliable-list queue.
//!
//! Producers `LPUSH` onto the queue list. A consumer moves one message at a
//! time into its own processing list with `BLMOVE`, so a crash between
//! receive and acknowledgement leaves the message recoverable:
//!
//! - ack: `LREM` from the processing list
//! - reject: `LREM`, then `LPUSH` onto the dead-letter list when one is configured
//! - connect: messages left in this worker's processing list are moved back

use super::queue::{Delivery, JobQueue};
use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::retry::retry_with_backoff;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// [`JobQueue`] on top of Redis lists
#[derive(Clone)]
pub struct RedisQueue {
    conn: MultiplexedConnection,
    queue: String,
    processing: String,
    dead_letter: Option<String>,
}

static NEXT_TAG: AtomicU64 = AtomicU64::new(1);

impl RedisQueue {
    /// Connect once and recover this worker's unacknowledged messages
    pub async fn connect(config: &QueueConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        let conn = client.get_multiplexed_tokio_connection().await?;

        let queue = Self {
            conn,
            queue: config.queue_name.clone(),
            processing: processing_list(&config.queue_name, &config.worker_id),
            dead_letter: config.dead_letter_queue.clone(),
        };
        queue.requeue_leftovers().await?;

        info!(
            queue = %queue.queue,
            processing = %queue.processing,
            "connected to job queue"
        );
        Ok(queue)
    }

    /// [`connect`](Self::connect) with the configured bounded retry
    pub async fn connect_with_retry(config: &QueueConfig) -> Result<Self> {
        retry_with_backoff(&config.connect_retry, |attempt| async move {
            info!(attempt, url = %redact_url(&config.url), "connecting to job queue");
            Self::connect(config).await
        })
        .await
    }

    async fn requeue_leftovers(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        let mut moved = 0usize;
        loop {
            let item: Option<Vec<u8>> = redis::cmd("LMOVE")
                .arg(&self.processing)
                .arg(&self.queue)
                .arg("RIGHT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await?;
            if item.is_none() {
                break;
            }
            moved += 1;
        }
        if moved > 0 {
            warn!(moved, queue = %self.queue, "requeued unacknowledged messages from a previous run");
        }
        Ok(moved)
    }

    async fn remove_from_processing(&self, delivery: &Delivery) -> Result<()> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("LREM")
            .arg(&self.processing)
            .arg(1)
            .arg(delivery.body.as_slice())
            .query_async(&mut conn)
            .await?;
        if removed == 0 {
            return Err(Error::Queue(format!(
                "delivery {} not found in {}",
                delivery.tag, self.processing
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn publish(&self, body: Vec<u8>) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("LPUSH")
            .arg(&self.queue)
            .arg(body)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn next_delivery(&self, wait: Duration) -> Result<Option<Delivery>> {
        let mut conn = self.conn.clone();
        // BLMOVE takes fractional seconds; 0 would block forever
        let timeout = wait.as_secs_f64().max(0.01);
        let body: Option<Vec<u8>> = redis::cmd("BLMOVE")
            .arg(&self.queue)
            .arg(&self.processing)
            .arg("RIGHT")
            .arg("LEFT")
            .arg(timeout)
            .query_async(&mut conn)
            .await?;

        Ok(body.map(|body| {
            let tag = NEXT_TAG.fetch_add(1, Ordering::Relaxed);
            debug!(tag, bytes = body.len(), "received delivery");
            Delivery { tag, body }
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.remove_from_processing(delivery).await
    }

    async fn reject(&self, delivery: &Delivery) -> Result<()> {
        self.remove_from_processing(delivery).await?;
        match &self.dead_letter {
            Some(dead_letter) => {
                let mut conn = self.conn.clone();
                let _: i64 = redis::cmd("LPUSH")
                    .arg(dead_letter)
                    .arg(delivery.body.as_slice())
                    .query_async(&mut conn)
                    .await?;
                info!(tag = delivery.tag, dead_letter = %dead_letter, "message dead-lettered");
            }
            None => {
                warn!(tag = delivery.tag, "message dropped, no dead-letter queue configured");
            }
        }
        Ok(())
    }
}

fn processing_list(queue: &str, worker_id: &str) -> String {
    format!("{queue}:processing:{worker_id}")
}

/// Hide the password part of a Redis URL for logging
fn redact_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("***"));
            parsed.to_string()
        }
        Ok(parsed) => parsed.to_string(),
        Err(_) => "<invalid url>".to_string(),
    }
}
