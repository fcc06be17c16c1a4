//! Lifecycle controller owning the acceptor and the health supervisor.

use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::balancer::{BackendSet, HealthSupervisor, SelectionPolicy};
use crate::config::Config;
use crate::error::CrossbarResult;
use crate::proxy::Listener;

/// Upper bound on waiting for the acceptor task, which itself drains
/// in-flight handlers for up to 10 s
const LISTENER_STOP_TIMEOUT: Duration = Duration::from_secs(15);

/// Upper bound on waiting for the supervisor's in-flight probe round
const SUPERVISOR_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Central coordinator tying the backends, policy, listener, and health
/// supervisor together. `start` and `stop` are idempotent; a failed start
/// unwinds through the stop path.
pub struct LoadBalancer {
    config: Config,
    running: AtomicBool,
    inner: Mutex<Option<Running>>,
}

struct Running {
    backends: Arc<BackendSet>,
    shutdown_tx: watch::Sender<bool>,
    listener_task: JoinHandle<()>,
    supervisor_task: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl LoadBalancer {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            running: AtomicBool::new(false),
            inner: Mutex::new(None),
        }
    }

    /// Start order: backends, policy, supervisor, acceptor
    pub async fn start(&self) -> CrossbarResult<()> {
        if self.running.load(Ordering::SeqCst) {
            warn!("Load balancer is already running");
            return Ok(());
        }

        info!("Load balancer starting");

        let backends = Arc::new(BackendSet::from_config(&self.config.backends));
        for backend in backends.iter() {
            info!(
                "Registered backend: {} (weight: {})",
                backend.address(),
                backend.weight()
            );
        }

        let policy = Arc::new(SelectionPolicy::new(self.config.algorithm));
        info!("Using algorithm: {}", self.config.algorithm);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let supervisor_task = if self.config.health_check.enabled {
            let supervisor =
                HealthSupervisor::new(Arc::clone(&backends), &self.config.health_check);
            Some(tokio::spawn(supervisor.run(shutdown_tx.subscribe())))
        } else {
            None
        };

        let listener = match Listener::bind(
            &self.config.server.host,
            self.config.server.port,
            self.config.server.thread_pool_size,
            Arc::clone(&backends),
            policy,
        )
        .await
        {
            Ok(listener) => listener,
            Err(e) => {
                // Unwind whatever already started
                let _ = shutdown_tx.send(true);
                if let Some(task) = supervisor_task {
                    stop_task(task, SUPERVISOR_STOP_TIMEOUT, "health supervisor").await;
                }
                return Err(e);
            }
        };

        let local_addr = listener.local_addr()?;
        let listener_task = tokio::spawn(listener.run(shutdown_rx));

        *self.inner.lock().await = Some(Running {
            backends,
            shutdown_tx,
            listener_task,
            supervisor_task,
            local_addr,
        });
        self.running.store(true, Ordering::SeqCst);

        Ok(())
    }

    /// Stop order is the reverse of start: acceptor first, supervisor last
    pub async fn stop(&self) -> CrossbarResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Load balancer is not running");
            return Ok(());
        }

        info!("Shutting down load balancer");

        let Some(running) = self.inner.lock().await.take() else {
            return Ok(());
        };

        let _ = running.shutdown_tx.send(true);

        stop_task(running.listener_task, LISTENER_STOP_TIMEOUT, "listener").await;
        if let Some(task) = running.supervisor_task {
            stop_task(task, SUPERVISOR_STOP_TIMEOUT, "health supervisor").await;
        }

        info!("Load balancer stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Address the listener actually bound, once running
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.lock().await.as_ref().map(|r| r.local_addr)
    }

    /// Shared backend set, once running
    pub async fn backends(&self) -> Option<Arc<BackendSet>> {
        self.inner
            .lock()
            .await
            .as_ref()
            .map(|r| Arc::clone(&r.backends))
    }

    /// Plain-text status report for the CLI
    pub async fn status(&self) -> String {
        if !self.is_running() {
            return "Load balancer is not running".to_string();
        }

        let inner = self.inner.lock().await;
        let Some(running) = inner.as_ref() else {
            return "Load balancer is not running".to_string();
        };

        let mut status = String::new();
        status.push_str("Load Balancer Status\n");
        status.push_str("====================\n");
        let _ = writeln!(status, "Listening on: {}", self.config.server.address());
        let _ = writeln!(status, "Algorithm: {}", self.config.algorithm);
        status.push_str("\nBackends:\n");
        let _ = writeln!(
            status,
            "Available: {}/{}\n",
            running.backends.available_count(),
            running.backends.len()
        );

        for backend in running.backends.iter() {
            let _ = writeln!(
                status,
                "  {} - {} (connections: {}, weight: {})",
                backend.address(),
                if backend.is_available() {
                    "AVAILABLE"
                } else {
                    "UNAVAILABLE"
                },
                backend.active_connections(),
                backend.weight()
            );
        }

        status
    }
}

/// Await a task up to `grace`, then abort it
async fn stop_task(mut task: JoinHandle<()>, grace: Duration, name: &str) {
    tokio::select! {
        _ = &mut task => {}
        _ = sleep(grace) => {
            warn!("{} did not stop within {:?}, aborting", name, grace);
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, HealthCheckConfig, LoggingConfig, PolicyKind, ServerConfig};

    fn test_config(port: u16) -> Config {
        Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port,
                thread_pool_size: 4,
            },
            algorithm: PolicyKind::RoundRobin,
            backends: vec![BackendConfig {
                host: "127.0.0.1".to_string(),
                port: 9001,
                weight: 1,
            }],
            health_check: HealthCheckConfig {
                enabled: false,
                ..Default::default()
            },
            logging: LoggingConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_start_stop_round_trip() {
        let lb = LoadBalancer::new(test_config(0));
        assert!(!lb.is_running());

        lb.start().await.unwrap();
        assert!(lb.is_running());
        assert!(lb.local_addr().await.is_some());

        lb.stop().await.unwrap();
        assert!(!lb.is_running());
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let lb = LoadBalancer::new(test_config(0));
        lb.start().await.unwrap();
        let addr = lb.local_addr().await;

        // Second start is refused without disturbing the first
        lb.start().await.unwrap();
        assert_eq!(lb.local_addr().await, addr);

        lb.stop().await.unwrap();
        // Stopping again is harmless
        lb.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_failure_unwinds() {
        let first = LoadBalancer::new(test_config(0));
        first.start().await.unwrap();
        let port = first.local_addr().await.unwrap().port();

        let mut config = test_config(port);
        config.health_check.enabled = true;
        config.health_check.interval = 3600;
        let second = LoadBalancer::new(config);

        assert!(second.start().await.is_err());
        assert!(!second.is_running());

        first.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_status_lists_backends() {
        let lb = LoadBalancer::new(test_config(0));
        assert_eq!(lb.status().await, "Load balancer is not running");

        lb.start().await.unwrap();
        let status = lb.status().await;
        assert!(status.contains("Algorithm: round-robin"));
        assert!(status.contains("Available: 1/1"));
        assert!(status.contains("127.0.0.1:9001 - AVAILABLE (connections: 0, weight: 1)"));

        lb.backends().await.unwrap().iter().next().unwrap().set_available(false);
        let status = lb.status().await;
        assert!(status.contains("Available: 0/1"));
        assert!(status.contains("UNAVAILABLE"));

        lb.stop().await.unwrap();
    }
}
