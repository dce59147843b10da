use anyhow::Result;
use axum::Router;
use slide_sync::config::AppConfig;
use slide_sync::routes;
use slide_sync::services::{
    bandwidth::BandwidthEstimator,
    job_store::JobStore,
    scheduler::{SchedulerConfig, SyncScheduler},
    sync_service::SyncService,
    transfer::{HttpRemoteEndpoint, TransferClient},
};
use sqlx::sqlite::SqlitePoolOptions;
use std::{fs, io::ErrorKind, path::Path, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cfg = AppConfig::from_env_and_args()?;
    tracing::info!("Starting slide-sync with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    // Create parent directory and file if needed so SQLx can open the URL
    let db_path_obj = Path::new(db_path);
    if let Some(parent) = db_path_obj.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(db_path)?;

    let db: Arc<sqlx::Pool<sqlx::Sqlite>> = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await?,
    );

    // --- Job store: schema + crash recovery ---
    let store = JobStore::new(db.clone());
    store.migrate().await?;
    let recovered = store.recover_interrupted().await?;
    if recovered > 0 {
        tracing::info!(
            recovered,
            "jobs interrupted by restart moved to paused; they will resume from persisted chunks"
        );
    }

    // --- Wire the engine: estimator, transfer client, worker loop ---
    let estimator = Arc::new(BandwidthEstimator::new(&cfg.remote_base_url));
    let transfer = TransferClient::new(HttpRemoteEndpoint::new(&cfg.remote_base_url));

    let scheduler_cfg = SchedulerConfig {
        retry_ceiling: cfg.retry_ceiling,
        probe_interval: Duration::from_secs(cfg.probe_interval_secs),
        idle_sleep: Duration::from_secs(cfg.idle_sleep_secs),
        ..SchedulerConfig::default()
    };

    let (command_tx, command_rx) = mpsc::channel(32);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = SyncScheduler::new(
        store.clone(),
        estimator.clone(),
        transfer,
        scheduler_cfg,
        command_rx,
        shutdown_rx,
    );
    let worker = tokio::spawn(scheduler.run());

    // --- Build router ---
    let service = SyncService::new(store, estimator, command_tx);
    let app: Router = routes::routes::routes().with_state(service);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // --- Stop the worker; it observes the signal at a chunk boundary ---
    let _ = shutdown_tx.send(true);
    worker.await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for shutdown signal: {}", err);
    }
}
