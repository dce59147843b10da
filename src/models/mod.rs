//! Core data models for the slide sync queue.
//!
//! These entities represent persisted sync jobs and queue-level summaries.
//! They map to the `sync_jobs` table via `sqlx::FromRow` and serialize
//! naturally as JSON via `serde`.

pub mod job;
pub mod summary;
