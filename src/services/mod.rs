//! Engine services: persistence, bandwidth probing, chunk planning, the
//! transfer protocol client, the background scheduler, and the public facade.

pub mod bandwidth;
pub mod job_store;
pub mod planner;
pub mod scheduler;
pub mod sync_service;
pub mod transfer;
