//! Error taxonomies for the sync engine.
//!
//! Faults are distinguished by enum variant, never by downcasting:
//! - `TransferError` — faults raised while talking to the remote endpoint
//!   or reading the source file. The scheduler turns these into `Paused`
//!   (with backoff) or `Failed` (budget exhausted) transitions.
//! - `StoreError` — local persistence faults. Non-fatal to the process; the
//!   scheduler retries after a fixed delay.
//! - `SyncError` — facade-level errors surfaced to API callers.
//! - `AppError` — HTTP-layer wrapper mapping the above onto status codes.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// A fault raised during the initiate / upload-chunk / complete protocol.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Timeout, connection reset, DNS failure, or a 5xx from the remote.
    /// Never terminal: pauses the job and flips the link estimate offline.
    #[error("network fault: {0}")]
    Network(String),

    /// The remote verified the chunk checksum and rejected it. Transient at
    /// the job level, but counted more aggressively toward the retry budget
    /// than a pure network fault.
    #[error("chunk {index} rejected by remote: checksum mismatch")]
    ChecksumRejected { index: u32 },

    /// The remote rejected the request itself (dead transfer handle, quota
    /// exceeded, …). Terminal for the current transfer handle: the job's
    /// `remote_transfer_id` is cleared and initiate re-runs on next attempt.
    #[error("remote rejected transfer: {0}")]
    Rejected(String),

    /// Local read fault on the source file.
    #[error("source read fault: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// How much this fault counts toward the job's retry budget.
    pub fn retry_weight(&self) -> i32 {
        match self {
            TransferError::ChecksumRejected { .. } => 2,
            _ => 1,
        }
    }

    /// True when the fault indicates the link itself is down.
    pub fn is_network(&self) -> bool {
        matches!(self, TransferError::Network(_))
    }
}

/// A fault in the local durable job store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sync job `{0}` not found")]
    JobNotFound(Uuid),

    /// A persisted row that no longer decodes. Operator-fixable; never a
    /// reason to crash the worker.
    #[error("corrupt job record: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Facade-level errors returned to API callers.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("source file not found: {0}")]
    SourceMissing(String),

    #[error("job `{job_id}` is {status} and cannot be {action}")]
    InvalidTransition {
        job_id: Uuid,
        status: &'static str,
        action: &'static str,
    },

    #[error("sync worker is not running")]
    WorkerGone,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A lightweight wrapper for HTTP errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::SourceMissing(_) => AppError::bad_request(err.to_string()),
            SyncError::InvalidTransition { .. } => {
                AppError::new(StatusCode::CONFLICT, err.to_string())
            }
            SyncError::WorkerGone => {
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
            SyncError::Store(StoreError::JobNotFound(_)) => AppError::not_found(err.to_string()),
            other => AppError::internal(other.to_string()),
        }
    }
}
