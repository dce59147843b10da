//! Offline-first sync agent for pathology slide files.
//!
//! Moves large slide files from an intermittently-connected edge lab to a
//! remote store over a resumable chunked-transfer protocol. Jobs are
//! persisted in SQLite and survive process restarts; a single background
//! worker selects jobs by priority, adapts chunk size to measured bandwidth,
//! and retries transient faults with exponential backoff.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
