//! HTTP handlers for the sync queue.
//!
//! Thin layer: handlers only enqueue work or read last-persisted state and
//! never schedule background execution themselves — all time-based
//! triggering belongs to the worker loop.

use crate::{
    errors::AppError,
    models::{job::SyncJob, job::SyncStatus, summary::QueueStatus},
    services::sync_service::SyncService,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

/// Request body for `POST /sync/jobs`.
#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    /// Local path to the slide file.
    pub source_path: String,

    /// Opaque metadata forwarded to the remote at initiate time. A
    /// `slide_id` entry, when present, names the logical owner.
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// 1 = urgent case, 5 = routine, 10 = screening batch.
    #[serde(default = "default_priority")]
    pub priority: i32,
}

fn default_priority() -> i32 {
    5
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub job_id: Uuid,
    pub slide_id: String,
    pub chunk_size: i64,
    pub chunk_count: u32,
}

/// Query params accepted by `GET /sync/jobs`.
#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
}

/// `POST /sync/jobs` — queue a slide file for upload.
pub async fn enqueue_job(
    State(service): State<SyncService>,
    Json(req): Json<EnqueueRequest>,
) -> Result<impl IntoResponse, AppError> {
    let job = service
        .enqueue(&req.source_path, req.metadata, req.priority)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            job_id: job.job_id,
            slide_id: job.slide_id,
            chunk_size: job.chunk_size,
            chunk_count: job.chunk_count,
        }),
    ))
}

/// `GET /sync/status` — link state plus per-status queue aggregates.
pub async fn sync_status(
    State(service): State<SyncService>,
) -> Result<Json<QueueStatus>, AppError> {
    Ok(Json(service.status().await?))
}

/// `GET /sync/jobs` — list jobs, optionally filtered by `?status=`.
pub async fn list_jobs(
    State(service): State<SyncService>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<SyncJob>>, AppError> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(raw.parse::<SyncStatus>().map_err(AppError::bad_request)?),
        None => None,
    };

    Ok(Json(service.list_jobs(status).await?))
}

/// `GET /sync/jobs/{id}` — one job snapshot.
pub async fn get_job(
    State(service): State<SyncService>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<SyncJob>, AppError> {
    Ok(Json(service.get_job(job_id).await?))
}

/// `POST /sync/jobs/{id}/cancel` — cooperative cancel, honored at a chunk
/// boundary.
pub async fn cancel_job(
    State(service): State<SyncService>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    service.cancel(job_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "job_id": job_id, "message": "cancel requested" })),
    ))
}

/// `POST /sync/jobs/{id}/requeue` — put a paused or failed job back in the
/// queue, keeping its uploaded chunks.
pub async fn requeue_job(
    State(service): State<SyncService>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    service.requeue(job_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "job_id": job_id, "message": "requeue requested" })),
    ))
}
