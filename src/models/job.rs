//! Represents a sync job — one slide file queued for upload.

use crate::errors::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle state of a sync job.
///
/// `Queued` and `Paused` are eligible for scheduling; `Completed` and
/// `Failed` are terminal and never mutated again by the worker.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Queued,
    Transferring,
    Paused,
    Completed,
    Failed,
}

impl SyncStatus {
    /// Stable string form used in the database and over the API.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Queued => "queued",
            SyncStatus::Transferring => "transferring",
            SyncStatus::Paused => "paused",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
        }
    }

    /// True for `Completed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncStatus::Completed | SyncStatus::Failed)
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(SyncStatus::Queued),
            "transferring" => Ok(SyncStatus::Transferring),
            "paused" => Ok(SyncStatus::Paused),
            "completed" => Ok(SyncStatus::Completed),
            "failed" => Ok(SyncStatus::Failed),
            other => Err(format!("unknown sync status `{}`", other)),
        }
    }
}

/// A single slide file queued for upload to the remote store.
///
/// `chunk_size` and `chunk_count` are derived once at enqueue time and fixed
/// for the job's lifetime; re-planning requires a new job. The source file is
/// read-only to the engine and must not change after enqueue.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SyncJob {
    /// Unique identifier, assigned at enqueue time.
    pub job_id: Uuid,

    /// Logical owner of the file (a slide). Not unique across jobs — a slide
    /// may be re-enqueued after a failed job is abandoned.
    pub slide_id: String,

    /// Local path to the slide file bytes.
    pub source_path: String,

    /// Size in bytes, fixed at enqueue time.
    pub file_size: i64,

    /// Chunk size in bytes, planned once from the bandwidth estimate.
    pub chunk_size: i64,

    /// Total number of chunks (`ceil(file_size / chunk_size)`).
    pub chunk_count: u32,

    /// Chunk indices acknowledged by the remote endpoint. Grows
    /// monotonically; may be non-contiguous after a crash mid-job.
    pub chunks_done: BTreeSet<u32>,

    pub status: SyncStatus,

    /// Lower is more urgent. 1 = urgent case, 5 = routine, 10 = batch.
    pub priority: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub retry_count: i32,

    /// Text of the last fault, kept for paused and failed jobs.
    pub error_message: Option<String>,

    /// Handle issued by the remote endpoint's initiate call. `None` until
    /// the first successful initiate; cleared again when the remote rejects
    /// the handle.
    pub remote_transfer_id: Option<String>,

    /// Opaque key/value pairs passed through to the remote at initiate time.
    pub metadata: HashMap<String, String>,

    /// Earliest next attempt, computed from the backoff schedule. `None`
    /// means eligible immediately.
    pub next_attempt_at: Option<DateTime<Utc>>,

    /// Set by an operator cancel request; excludes the job from scheduling
    /// until it is explicitly requeued.
    pub cancelled: bool,
}

impl SyncJob {
    /// Byte length of chunk `index` — `chunk_size` for all but a shorter
    /// final tail.
    pub fn chunk_len(&self, index: u32) -> i64 {
        let offset = i64::from(index) * self.chunk_size;
        self.chunk_size.min(self.file_size - offset)
    }

    /// Byte offset of chunk `index` within the source file.
    pub fn chunk_offset(&self, index: u32) -> i64 {
        i64::from(index) * self.chunk_size
    }

    /// True once every chunk has been acknowledged and persisted.
    pub fn all_chunks_done(&self) -> bool {
        self.chunks_done.len() as u32 == self.chunk_count
    }
}

/// Raw database row for a sync job. `chunks_done` and `metadata` are stored
/// as JSON text; `status` as its stable string form.
#[derive(FromRow, Debug)]
pub struct JobRow {
    pub job_id: Uuid,
    pub slide_id: String,
    pub source_path: String,
    pub file_size: i64,
    pub chunk_size: i64,
    pub chunk_count: i64,
    pub chunks_done: String,
    pub status: String,
    pub priority: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub retry_count: i64,
    pub error_message: Option<String>,
    pub remote_transfer_id: Option<String>,
    pub metadata: String,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub cancelled: bool,
}

impl JobRow {
    /// Decode the row into a `SyncJob`. A row that fails to decode is a
    /// corrupt record, not a missing one.
    pub fn into_job(self) -> Result<SyncJob, StoreError> {
        let status = self
            .status
            .parse::<SyncStatus>()
            .map_err(StoreError::Corrupt)?;
        let chunks_done: BTreeSet<u32> = serde_json::from_str(&self.chunks_done)?;
        let metadata: HashMap<String, String> = serde_json::from_str(&self.metadata)?;

        Ok(SyncJob {
            job_id: self.job_id,
            slide_id: self.slide_id,
            source_path: self.source_path,
            file_size: self.file_size,
            chunk_size: self.chunk_size,
            chunk_count: self.chunk_count as u32,
            chunks_done,
            status,
            priority: self.priority as i32,
            created_at: self.created_at,
            updated_at: self.updated_at,
            retry_count: self.retry_count as i32,
            error_message: self.error_message,
            remote_transfer_id: self.remote_transfer_id,
            metadata,
            next_attempt_at: self.next_attempt_at,
            cancelled: self.cancelled,
        })
    }
}
