//! SQLite-backed job store.

use super::{JobRecord, JobState, JobStore, LogEntry};
use crate::error::DatabaseError;
use crate::types::{JobId, JobResult, LogLevel, Phase};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use sqlx::{FromRow, SqliteConnection};
use std::path::Path;
use std::str::FromStr;

/// [`JobStore`] persisted in a SQLite file
#[derive(Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

#[derive(Debug, FromRow)]
struct JobRow {
    job_id: String,
    state: String,
    progress: i64,
    phase: Option<String>,
    message: Option<String>,
    result: Option<String>,
    created_at: i64,
    updated_at: i64,
}

#[derive(Debug, FromRow)]
struct LogRow {
    timestamp: i64,
    level: String,
    message: String,
}

impl SqliteJobStore {
    /// Open (or create) the database and bring its schema up to date
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                )))
            })?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse database path: {}",
                    e
                )))
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to connect to database: {}",
                e
            )))
        })?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Close the pool
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| migration_failed("create schema_version table", e))?;

        let current_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to query schema version: {}",
                        e
                    )))
                })?
                .flatten();

        if current_version.unwrap_or(0) < 1 {
            Self::migrate_v1(&mut conn).await?;
        }

        Ok(())
    }

    /// Migration v1: jobs and their log lines
    async fn migrate_v1(conn: &mut SqliteConnection) -> Result<()> {
        tracing::info!("Applying job store migration v1");

        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| migration_failed("begin transaction", e))?;

        let result = async {
            sqlx::query(
                r#"
                CREATE TABLE jobs (
                    job_id TEXT PRIMARY KEY,
                    state TEXT NOT NULL,
                    progress INTEGER NOT NULL DEFAULT 0,
                    phase TEXT,
                    message TEXT,
                    result TEXT,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                )
                "#,
            )
            .execute(&mut *conn)
            .await
            .map_err(|e| migration_failed("create jobs table", e))?;

            sqlx::query("CREATE INDEX idx_jobs_created_at ON jobs(created_at)")
                .execute(&mut *conn)
                .await
                .map_err(|e| migration_failed("create jobs index", e))?;

            sqlx::query(
                r#"
                CREATE TABLE job_logs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    job_id TEXT NOT NULL,
                    timestamp INTEGER NOT NULL,
                    level TEXT NOT NULL,
                    message TEXT NOT NULL
                )
                "#,
            )
            .execute(&mut *conn)
            .await
            .map_err(|e| migration_failed("create job_logs table", e))?;

            sqlx::query("CREATE INDEX idx_job_logs_job_id ON job_logs(job_id, id)")
                .execute(&mut *conn)
                .await
                .map_err(|e| migration_failed("create job_logs index", e))?;

            sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (1, ?)")
                .bind(Utc::now().timestamp())
                .execute(&mut *conn)
                .await
                .map_err(|e| migration_failed("record migration v1", e))?;

            Ok::<(), Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| migration_failed("commit migration v1", e))?;
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                return Err(e);
            }
        }

        tracing::info!("Job store migration v1 complete");
        Ok(())
    }
}

fn migration_failed(step: &str, e: sqlx::Error) -> Error {
    Error::Database(DatabaseError::MigrationFailed(format!(
        "Failed to {}: {}",
        step, e
    )))
}

fn query_failed(what: &str, e: impl std::fmt::Display) -> Error {
    Error::Database(DatabaseError::QueryFailed(format!("{}: {}", what, e)))
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| query_failed("Invalid timestamp", ms))
}

fn phase_text(phase: Phase) -> Result<String> {
    match serde_json::to_value(phase)? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(query_failed("Unexpected phase encoding", other)),
    }
}

impl TryFrom<JobRow> for JobRecord {
    type Error = Error;

    fn try_from(row: JobRow) -> Result<Self> {
        let state = JobState::from_str(&row.state).map_err(|e| query_failed("Bad job row", e))?;
        let phase = row
            .phase
            .map(|p| serde_json::from_value::<Phase>(serde_json::Value::String(p)))
            .transpose()?;
        let result = row
            .result
            .map(|r| serde_json::from_str::<JobResult>(&r))
            .transpose()?;

        Ok(JobRecord {
            job_id: JobId(row.job_id),
            state,
            progress: u8::try_from(row.progress.clamp(0, 100)).unwrap_or(0),
            phase,
            message: row.message,
            result,
            created_at: from_millis(row.created_at)?,
            updated_at: from_millis(row.updated_at)?,
        })
    }
}

impl TryFrom<LogRow> for LogEntry {
    type Error = Error;

    fn try_from(row: LogRow) -> Result<Self> {
        Ok(LogEntry {
            timestamp: from_millis(row.timestamp)?,
            level: LogLevel::from_str(&row.level).map_err(|e| query_failed("Bad log row", e))?,
            message: row.message,
        })
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn get(&self, job_id: &JobId) -> Result<Option<JobRecord>> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT job_id, state, progress, phase, message, result, created_at, updated_at
            FROM jobs
            WHERE job_id = ?
            "#,
        )
        .bind(job_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to get job", e))?;

        row.map(JobRecord::try_from).transpose()
    }

    async fn set(&self, record: JobRecord) -> Result<()> {
        let phase = record.phase.map(phase_text).transpose()?;
        let result = record
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO jobs (job_id, state, progress, phase, message, result, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(job_id) DO UPDATE SET
                state = excluded.state,
                progress = excluded.progress,
                phase = excluded.phase,
                message = excluded.message,
                result = excluded.result,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.job_id.as_str())
        .bind(record.state.as_str())
        .bind(i64::from(record.progress))
        .bind(phase)
        .bind(record.message)
        .bind(result)
        .bind(record.created_at.timestamp_millis())
        .bind(record.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to save job", e))?;

        Ok(())
    }

    async fn list(&self) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT job_id, state, progress, phase, message, result, created_at, updated_at
            FROM jobs
            ORDER BY created_at DESC, job_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to list jobs", e))?;

        rows.into_iter().map(JobRecord::try_from).collect()
    }

    async fn append_log(&self, job_id: &JobId, entry: LogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_logs (job_id, timestamp, level, message)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(job_id.as_str())
        .bind(entry.timestamp.timestamp_millis())
        .bind(entry.level.as_str())
        .bind(entry.message)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to append job log", e))?;

        Ok(())
    }

    async fn logs(&self, job_id: &JobId, tail: Option<usize>) -> Result<Vec<LogEntry>> {
        // LIMIT -1 is unbounded in SQLite
        let limit = tail.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));

        let rows = sqlx::query_as::<_, LogRow>(
            r#"
            SELECT timestamp, level, message FROM (
                SELECT id, timestamp, level, message
                FROM job_logs
                WHERE job_id = ?
                ORDER BY id DESC
                LIMIT ?
            )
            ORDER BY id ASC
            "#,
        )
        .bind(job_id.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to read job logs", e))?;

        rows.into_iter().map(LogEntry::try_from).collect()
    }
}
