//! Bandwidth estimation against the remote endpoint.
//!
//! One lightweight round-trip probe on a fixed interval gives an indicative
//! Mbps figure for chunk planning plus an online/offline flag for the
//! scheduler. The estimate is written only by the scheduler loop and read by
//! enqueue and status queries, so it lives behind a `tokio::sync::RwLock`.

use reqwest::Client;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Conservative assumption used before any probe has run.
pub const DEFAULT_ESTIMATE_MBPS: f64 = 5.0;

/// Reference payload size the round-trip time is scored against. The probe
/// itself is tiny; the figure is indicative, not a precise speed test.
const PROBE_REFERENCE_BYTES: f64 = 1024.0 * 1024.0;

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Point-in-time view of the link.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinkSnapshot {
    pub online: bool,
    pub mbps: f64,
}

/// Probes the remote endpoint and holds the current link estimate.
pub struct BandwidthEstimator {
    client: Client,
    probe_url: String,
    probe_timeout: Duration,
    state: RwLock<LinkSnapshot>,
}

impl BandwidthEstimator {
    /// Probe `{remote_base_url}/health`. Starts offline with the default
    /// estimate; the scheduler probes before its first dequeue, so the flag
    /// reflects a real measurement before any upload is attempted.
    pub fn new(remote_base_url: &str) -> Self {
        Self {
            client: Client::new(),
            probe_url: format!("{}/health", remote_base_url.trim_end_matches('/')),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            state: RwLock::new(LinkSnapshot {
                online: false,
                mbps: DEFAULT_ESTIMATE_MBPS,
            }),
        }
    }

    /// Override the probe timeout (tests use a short one).
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub async fn snapshot(&self) -> LinkSnapshot {
        *self.state.read().await
    }

    pub async fn is_online(&self) -> bool {
        self.state.read().await.online
    }

    /// Last measured estimate; stale but available while offline.
    pub async fn current_estimate_mbps(&self) -> f64 {
        self.state.read().await.mbps
    }

    /// Run one probe and update the estimate. On timeout or network error
    /// the link is marked offline and the numeric estimate is left as-is.
    /// Invoked only by the scheduler loop, never concurrently.
    pub async fn measure(&self) -> LinkSnapshot {
        let started = Instant::now();
        let result = self
            .client
            .get(&self.probe_url)
            .timeout(self.probe_timeout)
            .send()
            .await
            .and_then(|resp| resp.error_for_status());

        let outcome = match result {
            Ok(resp) => match resp.bytes().await {
                Ok(_) => {
                    let elapsed = started.elapsed().as_secs_f64().max(f64::EPSILON);
                    Ok((PROBE_REFERENCE_BYTES * 8.0) / (elapsed * 1_000_000.0))
                }
                Err(err) => Err(err),
            },
            Err(err) => Err(err),
        };

        let mut state = self.state.write().await;
        match outcome {
            Ok(mbps) => {
                state.online = true;
                state.mbps = mbps;
                info!(mbps = format!("{:.2}", mbps), "bandwidth probe");
            }
            Err(err) => {
                state.online = false;
                warn!(error = %err, "bandwidth probe failed, link offline");
            }
        }
        *state
    }

    /// Called by the scheduler when an upload hits a network fault, so status
    /// queries reflect the outage before the next probe runs.
    pub async fn mark_offline(&self) {
        self.state.write().await.online = false;
    }
}
