use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::backend::{Backend, BackendSet};
use crate::config::HealthCheckConfig;

/// Outcome of a single probe; lives only long enough to update one backend
#[derive(Debug)]
pub struct ProbeResult {
    pub healthy: bool,
    pub elapsed_ms: u64,
    pub message: String,
}

impl ProbeResult {
    fn ok(elapsed_ms: u64) -> Self {
        Self {
            healthy: true,
            elapsed_ms,
            message: "OK".to_string(),
        }
    }

    fn failed(elapsed_ms: u64, message: String) -> Self {
        Self {
            healthy: false,
            elapsed_ms,
            message,
        }
    }
}

/// Background service probing every backend on a fixed interval.
///
/// A probe is an HTTP GET against the configured path; only a 200 response
/// counts as success. Availability flips are guarded by consecutive-outcome
/// thresholds so a single blip never reroutes traffic.
pub struct HealthSupervisor {
    backends: Arc<BackendSet>,
    path: String,
    interval: Duration,
    unhealthy_threshold: u32,
    healthy_threshold: u32,
    client: Client,
}

impl HealthSupervisor {
    pub fn new(backends: Arc<BackendSet>, config: &HealthCheckConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout_duration())
            .build()
            .unwrap_or_default();

        Self {
            backends,
            path: config.path.clone(),
            interval: config.interval_duration(),
            unhealthy_threshold: config.unhealthy_threshold,
            healthy_threshold: config.healthy_threshold,
            client,
        }
    }

    /// Probe loop; the first round runs immediately, then every interval.
    /// Returns once the shutdown signal fires, after the in-flight round.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        info!("Health supervisor started (interval: {:?})", self.interval);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => self.check_all().await,
            }
        }

        debug!("Health supervisor stopped");
    }

    /// One probe round over the whole set, serially
    async fn check_all(&self) {
        let mut available = 0;

        for backend in self.backends.iter() {
            let result = self.probe(backend).await;
            self.apply(backend, &result);

            if backend.is_available() {
                available += 1;
            }
        }

        debug!(
            "Health check completed: {}/{} backends available",
            available,
            self.backends.len()
        );
    }

    async fn probe(&self, backend: &Backend) -> ProbeResult {
        let url = format!("http://{}:{}{}", backend.host(), backend.port(), self.path);
        let start = Instant::now();

        match self.client.get(&url).send().await {
            Ok(response) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                let status = response.status().as_u16();
                if status == 200 {
                    ProbeResult::ok(elapsed_ms)
                } else {
                    ProbeResult::failed(elapsed_ms, format!("Status: {}", status))
                }
            }
            Err(e) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                ProbeResult::failed(elapsed_ms, e.to_string())
            }
        }
    }

    /// Apply one probe outcome to a backend's hysteresis state
    fn apply(&self, backend: &Backend, result: &ProbeResult) {
        if result.healthy {
            let successes = backend.record_success();

            if !backend.is_available() && successes >= self.healthy_threshold {
                backend.set_available(true);
                backend.reset_successes();
                info!(
                    "Backend {} recovered and marked available ({}ms probe)",
                    backend.address(),
                    result.elapsed_ms
                );
            }
        } else {
            let failures = backend.record_failure();

            if backend.is_available() && failures >= self.unhealthy_threshold {
                backend.set_available(false);
                error!(
                    "Backend {} marked unavailable after {} consecutive failures: {}",
                    backend.address(),
                    failures,
                    result.message
                );
            } else if failures < self.unhealthy_threshold {
                warn!(
                    "Backend {} failed probe (attempt {}/{}): {}",
                    backend.address(),
                    failures,
                    self.unhealthy_threshold,
                    result.message
                );
            }
        }
    }
}
