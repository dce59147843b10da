//! Public facade over the sync engine.
//!
//! Cloneable handle carried as axum router state. Callers can enqueue a
//! slide file, read queue state, and request cancel/requeue — mutations of
//! existing jobs are routed over a command channel to the worker loop so it
//! stays the sole writer of job state.

use crate::errors::{StoreError, SyncError};
use crate::models::job::{SyncJob, SyncStatus};
use crate::models::summary::QueueStatus;
use crate::services::bandwidth::BandwidthEstimator;
use crate::services::job_store::JobStore;
use crate::services::planner;
use crate::services::scheduler::EngineCommand;
use chrono::Utc;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct SyncService {
    store: JobStore,
    estimator: Arc<BandwidthEstimator>,
    commands: mpsc::Sender<EngineCommand>,
}

impl SyncService {
    pub fn new(
        store: JobStore,
        estimator: Arc<BandwidthEstimator>,
        commands: mpsc::Sender<EngineCommand>,
    ) -> Self {
        Self {
            store,
            estimator,
            commands,
        }
    }

    /// Queue a slide file for upload.
    ///
    /// Chunking is planned here, once, from the current bandwidth estimate;
    /// it stays fixed for the job's lifetime. The source file must not
    /// change after enqueue.
    pub async fn enqueue(
        &self,
        source_path: &str,
        metadata: HashMap<String, String>,
        priority: i32,
    ) -> Result<SyncJob, SyncError> {
        let file_size = match tokio::fs::metadata(source_path).await {
            Ok(meta) => meta.len() as i64,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(SyncError::SourceMissing(source_path.to_string()));
            }
            Err(err) => return Err(SyncError::Io(err)),
        };

        let mbps = self.estimator.current_estimate_mbps().await;
        let plan = planner::plan(file_size, mbps);

        let slide_id = metadata
            .get("slide_id")
            .cloned()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now();

        let job = SyncJob {
            job_id: Uuid::new_v4(),
            slide_id,
            source_path: source_path.to_string(),
            file_size,
            chunk_size: plan.chunk_size,
            chunk_count: plan.chunk_count,
            chunks_done: Default::default(),
            status: SyncStatus::Queued,
            priority,
            created_at: now,
            updated_at: now,
            retry_count: 0,
            error_message: None,
            remote_transfer_id: None,
            metadata,
            next_attempt_at: None,
            cancelled: false,
        };

        self.store.save(&job).await.map_err(SyncError::Store)?;

        info!(
            job_id = %job.job_id,
            slide_id = %job.slide_id,
            file_size_mb = file_size / (1024 * 1024),
            chunks = job.chunk_count,
            priority,
            "slide queued for sync"
        );
        Ok(job)
    }

    /// Link state plus per-status queue aggregates, from last-persisted
    /// state.
    pub async fn status(&self) -> Result<QueueStatus, SyncError> {
        let link = self.estimator.snapshot().await;
        let queue = self.store.summary().await.map_err(SyncError::Store)?;

        Ok(QueueStatus {
            online: link.online,
            bandwidth_mbps: (link.mbps * 100.0).round() / 100.0,
            queue,
        })
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<SyncJob, SyncError> {
        self.store.get(job_id).await.map_err(SyncError::Store)
    }

    pub async fn list_jobs(&self, status: Option<SyncStatus>) -> Result<Vec<SyncJob>, SyncError> {
        let jobs = match status {
            Some(status) => self.store.list_by_status(status).await,
            None => self.store.list_all().await,
        };
        jobs.map_err(SyncError::Store)
    }

    /// Request cooperative cancellation. Takes effect immediately for a
    /// queued/paused job, at the next chunk boundary for the in-flight one.
    pub async fn cancel(&self, job_id: Uuid) -> Result<(), SyncError> {
        let job = self.get_job(job_id).await?;
        if job.status.is_terminal() {
            return Err(SyncError::InvalidTransition {
                job_id,
                status: job.status.as_str(),
                action: "cancelled",
            });
        }

        self.commands
            .send(EngineCommand::Cancel(job_id))
            .await
            .map_err(|_| SyncError::WorkerGone)
    }

    /// Put a paused (including cancelled) or failed job back in the queue.
    /// Uploaded chunks are kept, so the job resumes rather than restarts.
    pub async fn requeue(&self, job_id: Uuid) -> Result<(), SyncError> {
        let job = self.get_job(job_id).await?;
        if !matches!(job.status, SyncStatus::Paused | SyncStatus::Failed) {
            return Err(SyncError::InvalidTransition {
                job_id,
                status: job.status.as_str(),
                action: "requeued",
            });
        }

        self.commands
            .send(EngineCommand::Requeue(job_id))
            .await
            .map_err(|_| SyncError::WorkerGone)
    }

    /// Readiness check against the job store.
    pub async fn ready(&self) -> Result<(), StoreError> {
        self.store.ping().await
    }
}
