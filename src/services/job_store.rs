//! Durable sync-job persistence backed by SQLite.
//!
//! Every mutation is a single atomic upsert of one full job record — all
//! fields or none survive a crash between calls. There is no multi-step
//! read-modify-write across process boundaries: the scheduler loop is the
//! only writer of job state, and request handlers only insert new queued
//! rows or read.

use crate::errors::{StoreError, StoreResult};
use crate::models::job::{JobRow, SyncJob, SyncStatus};
use crate::models::summary::StatusBucket;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const JOB_COLUMNS: &str = "job_id, slide_id, source_path, file_size, chunk_size, chunk_count, \
     chunks_done, status, priority, created_at, updated_at, retry_count, \
     error_message, remote_transfer_id, metadata, next_attempt_at, cancelled";

/// Handle to the sync queue table. Cheap to clone; shares one pool.
#[derive(Clone)]
pub struct JobStore {
    db: Arc<SqlitePool>,
}

impl JobStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema. Idempotent; run once at startup.
    pub async fn migrate(&self) -> StoreResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        debug!("sync queue schema applied");
        Ok(())
    }

    /// Persist the full job record atomically (insert or replace by job_id).
    pub async fn save(&self, job: &SyncJob) -> StoreResult<()> {
        let chunks_done = serde_json::to_string(&job.chunks_done)?;
        let metadata = serde_json::to_string(&job.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO sync_jobs (
                job_id, slide_id, source_path, file_size, chunk_size, chunk_count,
                chunks_done, status, priority, created_at, updated_at, retry_count,
                error_message, remote_transfer_id, metadata, next_attempt_at, cancelled
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(job_id) DO UPDATE SET
                slide_id = excluded.slide_id,
                source_path = excluded.source_path,
                file_size = excluded.file_size,
                chunk_size = excluded.chunk_size,
                chunk_count = excluded.chunk_count,
                chunks_done = excluded.chunks_done,
                status = excluded.status,
                priority = excluded.priority,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                retry_count = excluded.retry_count,
                error_message = excluded.error_message,
                remote_transfer_id = excluded.remote_transfer_id,
                metadata = excluded.metadata,
                next_attempt_at = excluded.next_attempt_at,
                cancelled = excluded.cancelled
            "#,
        )
        .bind(job.job_id)
        .bind(&job.slide_id)
        .bind(&job.source_path)
        .bind(job.file_size)
        .bind(job.chunk_size)
        .bind(i64::from(job.chunk_count))
        .bind(&chunks_done)
        .bind(job.status.as_str())
        .bind(job.priority)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.retry_count)
        .bind(job.error_message.as_deref())
        .bind(job.remote_transfer_id.as_deref())
        .bind(&metadata)
        .bind(job.next_attempt_at)
        .bind(job.cancelled)
        .execute(&*self.db)
        .await?;

        Ok(())
    }

    /// Fetch one job by id.
    pub async fn get(&self, job_id: Uuid) -> StoreResult<SyncJob> {
        let sql = format!("SELECT {} FROM sync_jobs WHERE job_id = ?", JOB_COLUMNS);
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(job_id)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => StoreError::JobNotFound(job_id),
                other => StoreError::Sqlx(other),
            })?;

        row.into_job()
    }

    /// The lowest-priority-number, oldest eligible job, or none.
    ///
    /// Eligible means queued or paused, not cancelled, and past its backoff
    /// timestamp. Priority strictly orders selection; `created_at` breaks
    /// ties FIFO.
    pub async fn next_eligible(&self, now: DateTime<Utc>) -> StoreResult<Option<SyncJob>> {
        let sql = format!(
            "SELECT {} FROM sync_jobs \
             WHERE status IN ('queued', 'paused') AND cancelled = 0 \
               AND (next_attempt_at IS NULL OR next_attempt_at <= ?) \
             ORDER BY priority ASC, created_at ASC \
             LIMIT 1",
            JOB_COLUMNS
        );

        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(now)
            .fetch_optional(&*self.db)
            .await?;

        row.map(JobRow::into_job).transpose()
    }

    /// All jobs in a given status, newest first.
    pub async fn list_by_status(&self, status: SyncStatus) -> StoreResult<Vec<SyncJob>> {
        let sql = format!(
            "SELECT {} FROM sync_jobs WHERE status = ? ORDER BY created_at DESC",
            JOB_COLUMNS
        );

        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(status.as_str())
            .fetch_all(&*self.db)
            .await?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    /// All jobs, newest first.
    pub async fn list_all(&self) -> StoreResult<Vec<SyncJob>> {
        let sql = format!(
            "SELECT {} FROM sync_jobs ORDER BY created_at DESC",
            JOB_COLUMNS
        );

        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .fetch_all(&*self.db)
            .await?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    /// Per-status job counts and byte totals.
    pub async fn summary(&self) -> StoreResult<HashMap<String, StatusBucket>> {
        let rows = sqlx::query_as::<_, (String, i64, i64)>(
            "SELECT status, COUNT(*), COALESCE(SUM(file_size), 0) \
             FROM sync_jobs GROUP BY status",
        )
        .fetch_all(&*self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(status, count, total_bytes)| (status, StatusBucket { count, total_bytes }))
            .collect())
    }

    /// Startup recovery: any job left `transferring` by a crash becomes
    /// `paused`. The worker never assumes an in-progress chunk survived; the
    /// job resumes from its last persisted `chunks_done`.
    pub async fn recover_interrupted(&self) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE sync_jobs SET status = 'paused', updated_at = ? \
             WHERE status = 'transferring'",
        )
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;

        Ok(result.rows_affected())
    }

    /// Lightweight connectivity check for the readiness probe.
    pub async fn ping(&self) -> StoreResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }
}
