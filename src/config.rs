use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub remote_base_url: String,
    pub retry_ceiling: i32,
    pub probe_interval_secs: u64,
    pub idle_sleep_secs: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Offline-first slide sync agent")]
pub struct Args {
    /// Host to bind to (overrides SLIDE_SYNC_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides SLIDE_SYNC_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides SLIDE_SYNC_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Base URL of the remote transfer endpoint (overrides SLIDE_SYNC_REMOTE_URL)
    #[arg(long)]
    pub remote_base_url: Option<String>,

    /// Retry budget before a job is marked failed (overrides SLIDE_SYNC_RETRY_CEILING)
    #[arg(long)]
    pub retry_ceiling: Option<i32>,

    /// Seconds between bandwidth probes (overrides SLIDE_SYNC_PROBE_INTERVAL_SECS)
    #[arg(long)]
    pub probe_interval_secs: Option<u64>,

    /// Seconds the worker sleeps when the queue is empty (overrides SLIDE_SYNC_IDLE_SLEEP_SECS)
    #[arg(long)]
    pub idle_sleep_secs: Option<u64>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("SLIDE_SYNC_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_env("SLIDE_SYNC_PORT", 3000u16)?;
        let env_db = env::var("SLIDE_SYNC_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/sync/sync_queue.db".into());
        let env_remote =
            env::var("SLIDE_SYNC_REMOTE_URL").unwrap_or_else(|_| "http://localhost:8000".into());
        let env_retry_ceiling = parse_env("SLIDE_SYNC_RETRY_CEILING", 6i32)?;
        let env_probe_interval = parse_env("SLIDE_SYNC_PROBE_INTERVAL_SECS", 300u64)?;
        let env_idle_sleep = parse_env("SLIDE_SYNC_IDLE_SLEEP_SECS", 10u64)?;

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            remote_base_url: args.remote_base_url.unwrap_or(env_remote),
            retry_ceiling: args.retry_ceiling.unwrap_or(env_retry_ceiling),
            probe_interval_secs: args.probe_interval_secs.unwrap_or(env_probe_interval),
            idle_sleep_secs: args.idle_sleep_secs.unwrap_or(env_idle_sleep),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read a numeric environment variable, falling back to `default` when unset.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}
