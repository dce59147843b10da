//! Queue-level status payloads served by the HTTP facade.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Aggregate figures for one job status.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatusBucket {
    /// Number of jobs in this status.
    pub count: i64,

    /// Sum of `file_size` over those jobs.
    pub total_bytes: i64,
}

/// Snapshot of the sync queue: link state plus per-status aggregates.
///
/// Always reflects last-persisted job state — the worker persists before it
/// advances, so a status query never observes an unpersisted chunk.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct QueueStatus {
    /// Whether the last connectivity probe (or upload attempt) succeeded.
    pub online: bool,

    /// Last measured bandwidth estimate; stale but available while offline.
    pub bandwidth_mbps: f64,

    /// Per-status counts and byte totals, keyed by status string.
    pub queue: HashMap<String, StatusBucket>,
}
