//! Shared fixtures: a scripted in-memory remote endpoint, a temp-file job
//! store, and job builders.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use slide_sync::errors::TransferError;
use slide_sync::models::job::{SyncJob, SyncStatus};
use slide_sync::services::bandwidth::BandwidthEstimator;
use slide_sync::services::job_store::JobStore;
use slide_sync::services::scheduler::{EngineCommand, SchedulerConfig, SyncScheduler};
use slide_sync::services::transfer::{RemoteEndpoint, TransferClient};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Everything the fake remote observed, for assertions.
#[derive(Default, Debug)]
pub struct RemoteLog {
    pub initiated_slides: Vec<String>,
    pub issued_transfer_ids: Vec<String>,
    /// Chunk indices in arrival order, including attempts that then fault.
    pub uploads: Vec<u32>,
    pub upload_sizes: Vec<usize>,
    pub completed_transfer_ids: Vec<String>,
}

/// Scripted remote endpoint. Verifies chunk checksums like the real server
/// and can be armed to fault on specific phases or chunk indices.
#[derive(Default)]
pub struct FakeRemote {
    pub log: Mutex<RemoteLog>,
    transfer_counter: AtomicU32,
    fail_initiate_once: AtomicBool,
    fail_complete_once: AtomicBool,
    /// Chunk indices that fail with a network fault, once each.
    network_faults: Mutex<HashSet<u32>>,
    /// Chunk indices that fail with a local-read-style io fault, once each.
    io_faults: Mutex<HashSet<u32>>,
    /// Chunk index -> remaining checksum rejections.
    checksum_rejections: Mutex<HashMap<u32, u32>>,
    /// Chunk indices rejected outright (dead handle), once each.
    handle_rejections: Mutex<HashSet<u32>>,
    /// When set, the job table is hidden right after the next chunk upload
    /// is acknowledged, so the worker's follow-up persist fails.
    store_break: Mutex<Option<Arc<SqlitePool>>>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_initiate_once(&self) {
        self.fail_initiate_once.store(true, Ordering::SeqCst);
    }

    pub fn fail_complete_once(&self) {
        self.fail_complete_once.store(true, Ordering::SeqCst);
    }

    pub fn arm_network_fault(&self, index: u32) {
        self.network_faults.lock().unwrap().insert(index);
    }

    pub fn arm_io_fault(&self, index: u32) {
        self.io_faults.lock().unwrap().insert(index);
    }

    pub fn arm_checksum_rejections(&self, index: u32, count: u32) {
        self.checksum_rejections.lock().unwrap().insert(index, count);
    }

    pub fn arm_handle_rejection(&self, index: u32) {
        self.handle_rejections.lock().unwrap().insert(index);
    }

    pub fn arm_store_break(&self, pool: Arc<SqlitePool>) {
        *self.store_break.lock().unwrap() = Some(pool);
    }

    pub fn initiate_calls(&self) -> usize {
        self.log.lock().unwrap().initiated_slides.len()
    }

    pub fn uploads(&self) -> Vec<u32> {
        self.log.lock().unwrap().uploads.clone()
    }

    pub fn completes(&self) -> usize {
        self.log.lock().unwrap().completed_transfer_ids.len()
    }
}

#[async_trait]
impl RemoteEndpoint for FakeRemote {
    async fn initiate(
        &self,
        slide_id: &str,
        _file_size: i64,
        _chunk_count: u32,
        _metadata: &HashMap<String, String>,
    ) -> Result<String, TransferError> {
        if self.fail_initiate_once.swap(false, Ordering::SeqCst) {
            return Err(TransferError::Network("initiate timed out".into()));
        }

        let n = self.transfer_counter.fetch_add(1, Ordering::SeqCst);
        let transfer_id = format!("transfer-{}", n);
        let mut log = self.log.lock().unwrap();
        log.initiated_slides.push(slide_id.to_string());
        log.issued_transfer_ids.push(transfer_id.clone());
        Ok(transfer_id)
    }

    async fn upload_chunk(
        &self,
        _transfer_id: &str,
        index: u32,
        chunk: Bytes,
        checksum: &str,
    ) -> Result<(), TransferError> {
        {
            let mut log = self.log.lock().unwrap();
            log.uploads.push(index);
            log.upload_sizes.push(chunk.len());
        }

        let store_break = self.store_break.lock().unwrap().take();
        if let Some(pool) = store_break {
            break_job_store(&pool).await;
        }

        if self.network_faults.lock().unwrap().remove(&index) {
            return Err(TransferError::Network("connection reset".into()));
        }
        if self.io_faults.lock().unwrap().remove(&index) {
            return Err(TransferError::Io(std::io::Error::other("read failed")));
        }
        if self.handle_rejections.lock().unwrap().remove(&index) {
            return Err(TransferError::Rejected("invalid transfer handle".into()));
        }
        {
            let mut rejections = self.checksum_rejections.lock().unwrap();
            if let Some(remaining) = rejections.get_mut(&index) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(TransferError::ChecksumRejected { index });
                }
            }
        }

        // server-side integrity check, as the real endpoint does
        if format!("{:x}", md5::compute(&chunk)) != checksum {
            return Err(TransferError::ChecksumRejected { index });
        }
        Ok(())
    }

    async fn complete(&self, transfer_id: &str, _slide_id: &str) -> Result<(), TransferError> {
        if self.fail_complete_once.swap(false, Ordering::SeqCst) {
            return Err(TransferError::Network("complete timed out".into()));
        }
        self.log
            .lock()
            .unwrap()
            .completed_transfer_ids
            .push(transfer_id.to_string());
        Ok(())
    }
}

/// Job store over a real sqlite file in a temp dir, schema applied.
pub async fn test_store(dir: &TempDir) -> JobStore {
    test_store_with_pool(dir).await.0
}

/// As [`test_store`], also handing back the pool for outage fixtures.
pub async fn test_store_with_pool(dir: &TempDir) -> (JobStore, Arc<SqlitePool>) {
    let path = dir.path().join("sync_queue.db");
    let url = format!("sqlite://{}?mode=rwc", path.display());
    let pool = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .expect("connect sqlite"),
    );
    let store = JobStore::new(pool.clone());
    store.migrate().await.expect("migrate");
    (store, pool)
}

/// Simulate a job-store outage by hiding the queue table; every store call
/// fails until [`restore_job_store`] reverses it. Row data survives.
pub async fn break_job_store(pool: &SqlitePool) {
    sqlx::query("ALTER TABLE sync_jobs RENAME TO sync_jobs_outage")
        .execute(pool)
        .await
        .expect("hide job table");
}

pub async fn restore_job_store(pool: &SqlitePool) {
    sqlx::query("ALTER TABLE sync_jobs_outage RENAME TO sync_jobs")
        .execute(pool)
        .await
        .expect("restore job table");
}

/// Write a deterministic patterned source file and return its path.
pub fn write_source(dir: &TempDir, name: &str, len: usize) -> String {
    let path = dir.path().join(name);
    let bytes: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    std::fs::write(&path, bytes).expect("write source file");
    path.display().to_string()
}

/// A queued job with the given chunking, ready to save.
pub fn make_job(slide_id: &str, source_path: &str, file_size: i64, chunk_size: i64) -> SyncJob {
    let now = Utc::now();
    SyncJob {
        job_id: Uuid::new_v4(),
        slide_id: slide_id.to_string(),
        source_path: source_path.to_string(),
        file_size,
        chunk_size,
        chunk_count: if file_size == 0 {
            0
        } else {
            (file_size as u64).div_ceil(chunk_size as u64) as u32
        },
        chunks_done: BTreeSet::new(),
        status: SyncStatus::Queued,
        priority: 5,
        created_at: now,
        updated_at: now,
        retry_count: 0,
        error_message: None,
        remote_transfer_id: None,
        metadata: HashMap::new(),
        next_attempt_at: None,
        cancelled: false,
    }
}

/// Scheduler config with short sleeps. The long probe interval means the
/// link is probed once on the worker's first pass and never again.
pub fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        retry_ceiling: 6,
        probe_interval: Duration::from_secs(3600),
        idle_sleep: Duration::from_millis(5),
        offline_sleep: Duration::from_millis(5),
        store_retry_delay: Duration::from_millis(5),
        save_retry_delay: Duration::from_millis(5),
    }
}

pub struct TestEngine {
    pub scheduler: SyncScheduler<Arc<FakeRemote>>,
    pub commands: mpsc::Sender<EngineCommand>,
    pub shutdown: watch::Sender<bool>,
    pub estimator: Arc<BandwidthEstimator>,
    probe_server: Option<MockServer>,
}

/// Wire a scheduler over the given store and fake remote, backed by a stub
/// `/health` endpoint so the first-pass probe brings the link online.
pub async fn test_engine(
    store: JobStore,
    remote: Arc<FakeRemote>,
    config: SchedulerConfig,
) -> TestEngine {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let estimator = Arc::new(BandwidthEstimator::new(&server.uri()));
    let mut engine = test_engine_with_estimator(store, remote, config, estimator);
    engine.probe_server = Some(server);
    engine
}

pub fn test_engine_with_estimator(
    store: JobStore,
    remote: Arc<FakeRemote>,
    config: SchedulerConfig,
    estimator: Arc<BandwidthEstimator>,
) -> TestEngine {
    let (commands, command_rx) = mpsc::channel(32);
    let (shutdown, shutdown_rx) = watch::channel(false);
    let scheduler = SyncScheduler::new(
        store,
        estimator.clone(),
        TransferClient::new(remote),
        config,
        command_rx,
        shutdown_rx,
    );
    TestEngine {
        scheduler,
        commands,
        shutdown,
        estimator,
        probe_server: None,
    }
}

/// Make a paused/backed-off job immediately eligible again, simulating the
/// backoff interval having elapsed.
pub async fn expire_backoff(store: &JobStore, job_id: Uuid) {
    let mut job = store.get(job_id).await.expect("load job");
    job.next_attempt_at = Some(Utc::now() - chrono::Duration::seconds(1));
    store.save(&job).await.expect("save job");
}
