//! In-process job store.

use super::{JobRecord, JobStore, LogEntry};
use crate::error::Result;
use crate::types::JobId;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Log lines kept per job; older lines are dropped first
const MAX_LOG_LINES: usize = 1000;

/// [`JobStore`] backed by in-memory maps; contents die with the process
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    records: RwLock<HashMap<JobId, JobRecord>>,
    logs: RwLock<HashMap<JobId, Vec<LogEntry>>>,
}

impl MemoryJobStore {
    #[allow(missing_docs)]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get(&self, job_id: &JobId) -> Result<Option<JobRecord>> {
        Ok(self.records.read().await.get(job_id).cloned())
    }

    async fn set(&self, record: JobRecord) -> Result<()> {
        self.records
            .write()
            .await
            .insert(record.job_id.clone(), record);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<JobRecord>> {
        let mut records: Vec<JobRecord> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        Ok(records)
    }

    async fn append_log(&self, job_id: &JobId, entry: LogEntry) -> Result<()> {
        let mut logs = self.logs.write().await;
        let lines = logs.entry(job_id.clone()).or_default();
        lines.push(entry);
        if lines.len() > MAX_LOG_LINES {
            let excess = lines.len() - MAX_LOG_LINES;
            lines.drain(..excess);
        }
        Ok(())
    }

    async fn logs(&self, job_id: &JobId, tail: Option<usize>) -> Result<Vec<LogEntry>> {
        let logs = self.logs.read().await;
        let Some(lines) = logs.get(job_id) else {
            return Ok(Vec::new());
        };
        let skip = tail.map_or(0, |n| lines.len().saturating_sub(n));
        Ok(lines[skip..].to_vec())
    }
}
