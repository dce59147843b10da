//! Defines routes for the sync queue API.
//!
//! ## Structure
//! - **Queue endpoints**
//!   - `POST /sync/jobs`              — enqueue a slide file
//!   - `GET  /sync/jobs`              — list jobs (supports ?status=)
//!   - `GET  /sync/status`            — link state + per-status aggregates
//!
//! - **Job endpoints**
//!   - `GET  /sync/jobs/{id}`         — one job snapshot
//!   - `POST /sync/jobs/{id}/cancel`  — cooperative cancel
//!   - `POST /sync/jobs/{id}/requeue` — back into the queue
//!
//! Handlers only enqueue or read; the background worker owns all job
//! mutations.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        sync_handlers::{cancel_job, enqueue_job, get_job, list_jobs, requeue_job, sync_status},
    },
    services::sync_service::SyncService,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build and return the router for all sync-queue routes.
///
/// The router carries shared state (`SyncService`) to all handlers.
pub fn routes() -> Router<SyncService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // queue-level routes
        .route("/sync/status", get(sync_status))
        .route("/sync/jobs", post(enqueue_job).get(list_jobs))
        // job-level routes
        .route("/sync/jobs/{id}", get(get_job))
        .route("/sync/jobs/{id}/cancel", post(cancel_job))
        .route("/sync/jobs/{id}/requeue", post(requeue_job))
}
