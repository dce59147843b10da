//! Background sync worker — the engine's single concurrency unit.
//!
//! One long-lived loop owns all job mutations and all time-based triggering:
//! connectivity probing, priority-ordered job selection, retry/backoff, and
//! status transitions. At most one job is in flight at a time (rural links
//! cannot usefully saturate more than one stream), which keeps the
//! crash-safety argument to "at most one partially-written chunk state per
//! process lifetime".
//!
//! Request handlers never touch this loop directly; they insert queued rows
//! through the store or send commands over an mpsc channel. Shutdown and
//! cancellation are cooperative and observed only at chunk boundaries.

use crate::errors::TransferError;
use crate::models::job::{SyncJob, SyncStatus};
use crate::services::bandwidth::BandwidthEstimator;
use crate::services::job_store::JobStore;
use crate::services::transfer::{RemoteEndpoint, TransferClient};
use chrono::Utc;
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Base retry delays in seconds, indexed by retry count and capped at the
/// last entry.
pub const BACKOFF_SCHEDULE_SECS: [u64; 6] = [5, 10, 30, 60, 300, 600];

const SAVE_ATTEMPTS: u32 = 3;

/// Backoff delay for the given retry count, without jitter. Non-decreasing
/// in `retry_count`, capped at the end of the schedule.
pub fn backoff_base(retry_count: i32) -> Duration {
    let index = (retry_count.max(1) as usize - 1).min(BACKOFF_SCHEDULE_SECS.len() - 1);
    Duration::from_secs(BACKOFF_SCHEDULE_SECS[index])
}

/// Jittered backoff delay: the base scaled by a factor in [0.75, 1.25), so
/// a fleet of agents does not hammer a recovering link in lockstep.
pub fn backoff_delay(retry_count: i32) -> Duration {
    let jitter = rand::thread_rng().gen_range(0.75..1.25);
    backoff_base(retry_count).mul_f64(jitter)
}

/// Requests routed through the worker so that it stays the sole writer of
/// job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCommand {
    /// Cooperative cancel: honored immediately for queued/paused jobs, at
    /// the next chunk boundary for the in-flight job.
    Cancel(Uuid),

    /// Put a paused (including cancelled) or failed job back in the queue,
    /// keeping its uploaded chunks.
    Requeue(Uuid),
}

/// Tuning knobs for the worker loop.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Retry budget; a job whose `retry_count` exceeds this is failed.
    pub retry_ceiling: i32,
    /// How often the bandwidth probe runs.
    pub probe_interval: Duration,
    /// Sleep when the queue has no eligible job.
    pub idle_sleep: Duration,
    /// Sleep while the link is offline; no job is dequeued until a probe
    /// succeeds again.
    pub offline_sleep: Duration,
    /// Sleep after a job-store fault before re-selecting.
    pub store_retry_delay: Duration,
    /// Delay between the bounded retries of a single persist.
    pub save_retry_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retry_ceiling: 6,
            probe_interval: Duration::from_secs(300),
            idle_sleep: Duration::from_secs(10),
            offline_sleep: Duration::from_secs(30),
            store_retry_delay: Duration::from_secs(30),
            save_retry_delay: Duration::from_secs(2),
        }
    }
}

enum Wake {
    Timer,
    Shutdown,
    Command(EngineCommand),
}

/// The background worker. Owns the transfer client and is the only writer
/// of job status and `chunks_done`.
pub struct SyncScheduler<R: RemoteEndpoint> {
    store: JobStore,
    estimator: Arc<BandwidthEstimator>,
    transfer: TransferClient<R>,
    config: SchedulerConfig,
    command_rx: mpsc::Receiver<EngineCommand>,
    shutdown: watch::Receiver<bool>,
    cancel_requests: HashSet<Uuid>,
    last_probe: Option<Instant>,
    pending_recovery: bool,
}

impl<R: RemoteEndpoint> SyncScheduler<R> {
    pub fn new(
        store: JobStore,
        estimator: Arc<BandwidthEstimator>,
        transfer: TransferClient<R>,
        config: SchedulerConfig,
        command_rx: mpsc::Receiver<EngineCommand>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            estimator,
            transfer,
            config,
            command_rx,
            shutdown,
            cancel_requests: HashSet::new(),
            last_probe: None,
            pending_recovery: false,
        }
    }

    /// Run the worker until shutdown is signalled.
    pub async fn run(mut self) {
        info!("sync worker started");
        while self.run_pass().await {}
        info!("sync worker stopped");
    }

    /// One scheduling pass: probe if due, gate on connectivity, select the
    /// next eligible job and drive it. Returns `false` once shutdown has
    /// been observed. Public so embedders and tests can step the worker
    /// deterministically.
    pub async fn run_pass(&mut self) -> bool {
        if *self.shutdown.borrow() {
            return false;
        }

        while let Ok(cmd) = self.command_rx.try_recv() {
            self.apply_command(cmd).await;
        }

        // An abandoned pass leaves its job persisted as `transferring`,
        // which eligibility skips. Repair that before selecting again.
        if self.pending_recovery {
            match self.store.recover_interrupted().await {
                Ok(recovered) => {
                    self.pending_recovery = false;
                    if recovered > 0 {
                        warn!(recovered, "stale in-flight jobs moved back to paused");
                    }
                }
                Err(err) => {
                    warn!(error = %err, "job store still failing, backing off");
                    return self.idle(self.config.store_retry_delay).await;
                }
            }
        }

        // first pass probes before any dequeue
        if self
            .last_probe
            .is_none_or(|probed| probed.elapsed() >= self.config.probe_interval)
        {
            self.estimator.measure().await;
            self.last_probe = Some(Instant::now());
        }

        if !self.estimator.is_online().await {
            return self.idle(self.config.offline_sleep).await;
        }

        match self.store.next_eligible(Utc::now()).await {
            Ok(Some(job)) => {
                self.process(job).await;
                true
            }
            Ok(None) => self.idle(self.config.idle_sleep).await,
            Err(err) => {
                warn!(error = %err, "job store fault, backing off");
                self.idle(self.config.store_retry_delay).await
            }
        }
    }

    /// Sleep, waking early for shutdown or a command. Returns `false` on
    /// shutdown.
    async fn idle(&mut self, duration: Duration) -> bool {
        match self.wait(duration).await {
            Wake::Shutdown => false,
            Wake::Command(cmd) => {
                self.apply_command(cmd).await;
                true
            }
            Wake::Timer => true,
        }
    }

    async fn wait(&mut self, duration: Duration) -> Wake {
        let Self {
            shutdown,
            command_rx,
            ..
        } = self;

        tokio::select! {
            _ = tokio::time::sleep(duration) => Wake::Timer,
            _ = shutdown.changed() => Wake::Shutdown,
            cmd = command_rx.recv() => match cmd {
                Some(cmd) => Wake::Command(cmd),
                // all senders dropped: the facade is gone, stop the worker
                None => Wake::Shutdown,
            },
        }
    }

    async fn apply_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Cancel(job_id) => self.cancel_job(job_id).await,
            EngineCommand::Requeue(job_id) => self.requeue_job(job_id).await,
        }
    }

    async fn cancel_job(&mut self, job_id: Uuid) {
        self.cancel_requests.insert(job_id);

        let mut job = match self.store.get(job_id).await {
            Ok(job) => job,
            Err(err) => {
                self.cancel_requests.remove(&job_id);
                warn!(%job_id, error = %err, "cancel target not loadable");
                return;
            }
        };

        match job.status {
            SyncStatus::Queued | SyncStatus::Paused => {
                job.status = SyncStatus::Paused;
                job.cancelled = true;
                job.error_message = Some("cancelled".into());
                job.updated_at = Utc::now();
                if self.persist(&job).await {
                    self.cancel_requests.remove(&job_id);
                    info!(%job_id, "sync job cancelled");
                }
            }
            SyncStatus::Transferring => {
                // left in cancel_requests; honored at the next chunk boundary
                debug!(%job_id, "cancel requested for in-flight job");
            }
            SyncStatus::Completed | SyncStatus::Failed => {
                self.cancel_requests.remove(&job_id);
                warn!(%job_id, status = job.status.as_str(), "cancel ignored for terminal job");
            }
        }
    }

    async fn requeue_job(&mut self, job_id: Uuid) {
        let mut job = match self.store.get(job_id).await {
            Ok(job) => job,
            Err(err) => {
                warn!(%job_id, error = %err, "requeue target not loadable");
                return;
            }
        };

        if !matches!(job.status, SyncStatus::Paused | SyncStatus::Failed) {
            warn!(%job_id, status = job.status.as_str(), "requeue ignored");
            return;
        }

        job.status = SyncStatus::Queued;
        job.cancelled = false;
        job.retry_count = 0;
        job.next_attempt_at = None;
        job.error_message = None;
        job.updated_at = Utc::now();
        if self.persist(&job).await {
            self.cancel_requests.remove(&job_id);
            info!(%job_id, "sync job requeued");
        }
    }

    /// Drive one job: initiate → remaining chunks in ascending index order
    /// (skipping persisted-done ones) → complete. Persists after every
    /// chunk; a chunk is never considered done until its persistence write
    /// has succeeded.
    async fn process(&mut self, mut job: SyncJob) {
        info!(
            job_id = %job.job_id,
            slide_id = %job.slide_id,
            chunks_done = job.chunks_done.len(),
            chunk_count = job.chunk_count,
            "processing sync job"
        );

        job.status = SyncStatus::Transferring;
        job.updated_at = Utc::now();
        if !self.persist(&job).await {
            return;
        }

        match self.transfer.ensure_initiated(&job).await {
            Ok(Some(transfer_id)) => {
                job.remote_transfer_id = Some(transfer_id);
                job.updated_at = Utc::now();
                if !self.persist(&job).await {
                    return;
                }
            }
            Ok(None) => {}
            Err(fault) => {
                self.handle_fault(&mut job, fault).await;
                return;
            }
        }

        for index in 0..job.chunk_count {
            if job.chunks_done.contains(&index) {
                continue;
            }

            // chunk boundary: the only place shutdown and cancellation are
            // observed, never mid-chunk-write
            while let Ok(cmd) = self.command_rx.try_recv() {
                self.apply_command(cmd).await;
            }
            if *self.shutdown.borrow() {
                job.status = SyncStatus::Paused;
                job.updated_at = Utc::now();
                self.persist(&job).await;
                info!(job_id = %job.job_id, "shutdown requested, job paused at chunk boundary");
                return;
            }
            if self.cancel_requests.remove(&job.job_id) {
                job.status = SyncStatus::Paused;
                job.cancelled = true;
                job.error_message = Some("cancelled".into());
                job.updated_at = Utc::now();
                self.persist(&job).await;
                info!(job_id = %job.job_id, "sync job cancelled at chunk boundary");
                return;
            }

            match self.transfer.send_chunk(&job, index).await {
                Ok(()) => {
                    job.chunks_done.insert(index);
                    job.updated_at = Utc::now();
                    if !self.persist(&job).await {
                        return;
                    }
                    debug!(
                        job_id = %job.job_id,
                        chunk = format!("{}/{}", index + 1, job.chunk_count),
                        "chunk uploaded"
                    );
                }
                Err(fault) => {
                    self.handle_fault(&mut job, fault).await;
                    return;
                }
            }
        }

        match self.transfer.finalize(&job).await {
            Ok(()) => {
                job.status = SyncStatus::Completed;
                job.error_message = None;
                job.next_attempt_at = None;
                job.updated_at = Utc::now();
                self.persist(&job).await;
                info!(job_id = %job.job_id, slide_id = %job.slide_id, "slide sync completed");
            }
            Err(fault) => {
                // chunks stay persisted; only complete is retried on resume
                self.handle_fault(&mut job, fault).await;
            }
        }
    }

    /// Convert a transfer fault into a state transition: pause with backoff
    /// while the retry budget lasts, fail once it is exhausted. A remote
    /// rejection also kills the current transfer handle so the next attempt
    /// re-initiates instead of retrying against a dead handle.
    async fn handle_fault(&mut self, job: &mut SyncJob, fault: TransferError) {
        if fault.is_network() {
            self.estimator.mark_offline().await;
        }
        if matches!(fault, TransferError::Rejected(_)) {
            job.remote_transfer_id = None;
        }

        job.retry_count += fault.retry_weight();
        job.error_message = Some(fault.to_string());
        job.updated_at = Utc::now();

        if job.retry_count > self.config.retry_ceiling {
            job.status = SyncStatus::Failed;
            job.next_attempt_at = None;
            error!(
                job_id = %job.job_id,
                retry_count = job.retry_count,
                error = %fault,
                "retry budget exhausted, job failed"
            );
        } else {
            let delay = backoff_delay(job.retry_count);
            job.status = SyncStatus::Paused;
            job.next_attempt_at =
                Some(Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64));
            warn!(
                job_id = %job.job_id,
                retry_count = job.retry_count,
                delay_secs = delay.as_secs(),
                error = %fault,
                "transient fault, job paused"
            );
        }

        self.persist(job).await;
    }

    /// Bounded-retry persist. Returns `false` when the store stays broken;
    /// the caller abandons the pass so in-memory state is never advanced
    /// past a failed write, and the next pass repairs the stale
    /// `transferring` row before selecting.
    async fn persist(&mut self, job: &SyncJob) -> bool {
        for attempt in 1..=SAVE_ATTEMPTS {
            match self.store.save(job).await {
                Ok(()) => return true,
                Err(err) => {
                    warn!(job_id = %job.job_id, attempt, error = %err, "job store save failed");
                    if attempt < SAVE_ATTEMPTS {
                        tokio::time::sleep(self.config.save_retry_delay).await;
                    }
                }
            }
        }
        self.pending_recovery = true;
        error!(job_id = %job.job_id, "abandoning pass, job state not persisted");
        false
    }
}
