//! Job queue abstraction and the in-process implementation.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

/// One message handed to a consumer, pending acknowledgement
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    /// Consumer-local handle used to ack or reject
    pub tag: u64,
    /// Raw message body
    pub body: Vec<u8>,
}

/// At-least-once job queue with explicit acknowledgement
///
/// Consumers hold at most one unacknowledged delivery at a time.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append a message
    async fn publish(&self, body: Vec<u8>) -> Result<()>;

    /// Wait up to `wait` for the next message
    async fn next_delivery(&self, wait: Duration) -> Result<Option<Delivery>>;

    /// The delivery was handled; drop it for good
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// The delivery is unusable; move it to the dead-letter path without requeue
    async fn reject(&self, delivery: &Delivery) -> Result<()>;
}

#[derive(Debug, Default)]
struct MemoryState {
    pending: VecDeque<Vec<u8>>,
    unacked: HashMap<u64, Vec<u8>>,
    dead_letters: Vec<Vec<u8>>,
    next_tag: u64,
    acked: u64,
    rejected: u64,
}

/// [`JobQueue`] living in process memory, for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryQueue {
    state: Mutex<MemoryState>,
    notify: Notify,
}

impl MemoryQueue {
    #[allow(missing_docs)]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Messages waiting for a consumer
    pub fn pending(&self) -> usize {
        self.state().pending.len()
    }

    /// Deliveries handed out and not settled yet
    pub fn in_flight(&self) -> usize {
        self.state().unacked.len()
    }

    /// Number of acknowledged deliveries
    pub fn acked(&self) -> u64 {
        self.state().acked
    }

    /// Number of rejected deliveries
    pub fn rejected(&self) -> u64 {
        self.state().rejected
    }

    /// Bodies of rejected deliveries
    pub fn dead_letters(&self) -> Vec<Vec<u8>> {
        self.state().dead_letters.clone()
    }

    fn try_take(&self) -> Result<Option<Delivery>> {
        let mut state = self.state();
        if let Some(tag) = state.unacked.keys().next() {
            return Err(Error::Queue(format!(
                "delivery {tag} is still unacknowledged"
            )));
        }
        let Some(body) = state.pending.pop_front() else {
            return Ok(None);
        };
        state.next_tag += 1;
        let tag = state.next_tag;
        state.unacked.insert(tag, body.clone());
        Ok(Some(Delivery { tag, body }))
    }

    fn settle(&self, delivery: &Delivery) -> Result<(MutexGuard<'_, MemoryState>, Vec<u8>)> {
        let mut state = self.state();
        let body = state
            .unacked
            .remove(&delivery.tag)
            .ok_or_else(|| Error::Queue(format!("unknown delivery {}", delivery.tag)))?;
        Ok((state, body))
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn publish(&self, body: Vec<u8>) -> Result<()> {
        self.state().pending.push_back(body);
        self.notify.notify_one();
        Ok(())
    }

    async fn next_delivery(&self, wait: Duration) -> Result<Option<Delivery>> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(delivery) = self.try_take()? {
                return Ok(Some(delivery));
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return self.try_take();
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let (mut state, _) = self.settle(delivery)?;
        state.acked += 1;
        Ok(())
    }

    async fn reject(&self, delivery: &Delivery) -> Result<()> {
        let (mut state, body) = self.settle(delivery)?;
        state.rejected += 1;
        state.dead_letters.push(body);
        Ok(())
    }
}
