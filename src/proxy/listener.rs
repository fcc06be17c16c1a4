//! Accept loop and bounded dispatch to connection handlers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{error, info, warn};

use super::handler::handle_connection;
use crate::balancer::{BackendSet, SelectionPolicy};
use crate::error::{CrossbarError, CrossbarResult};

/// Pending-connection backlog for the listening socket
const CONNECTION_BACKLOG: u32 = 50;

/// Grace period for in-flight handlers at shutdown
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Accepts client connections and hands each to a handler task.
///
/// Concurrency is capped by a semaphore holding `pool_size` permits; once
/// they are exhausted the accept loop itself waits, which backpressures new
/// clients into the listen backlog.
pub struct Listener {
    listener: TcpListener,
    backends: Arc<BackendSet>,
    policy: Arc<SelectionPolicy>,
    limiter: Arc<Semaphore>,
}

impl Listener {
    /// Resolve and bind the listening socket. Binding happens here, not in
    /// `run`, so a bind failure fails startup synchronously.
    pub async fn bind(
        host: &str,
        port: u16,
        pool_size: usize,
        backends: Arc<BackendSet>,
        policy: Arc<SelectionPolicy>,
    ) -> CrossbarResult<Self> {
        let addr_str = format!("{}:{}", host, port);
        let addr: SocketAddr = tokio::net::lookup_host(&addr_str)
            .await
            .map_err(|e| CrossbarError::network(format!("cannot resolve {}: {}", addr_str, e)))?
            .next()
            .ok_or_else(|| CrossbarError::network(format!("cannot resolve {}", addr_str)))?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(|e| CrossbarError::network(format!("cannot create socket: {}", e)))?;

        socket
            .set_reuseaddr(true)
            .map_err(|e| CrossbarError::network(e.to_string()))?;
        socket
            .bind(addr)
            .map_err(|e| CrossbarError::network(format!("cannot bind {}: {}", addr, e)))?;
        let listener = socket
            .listen(CONNECTION_BACKLOG)
            .map_err(|e| CrossbarError::network(format!("cannot listen on {}: {}", addr, e)))?;

        info!("Listening on {}", addr);

        Ok(Self {
            listener,
            backends,
            policy,
            limiter: Arc::new(Semaphore::new(pool_size)),
        })
    }

    /// Actual bound address, useful when the configured port is 0
    pub fn local_addr(&self) -> CrossbarResult<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| CrossbarError::network(e.to_string()))
    }

    /// Accept until the shutdown signal fires, then drain in-flight handlers
    /// for up to the grace period before aborting the stragglers.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut handlers: JoinSet<()> = JoinSet::new();

        loop {
            // Reap completed handlers so the set does not grow unbounded
            while handlers.try_join_next().is_some() {}

            tokio::select! {
                _ = shutdown.changed() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let permit = match self.limiter.clone().acquire_owned().await {
                            Ok(permit) => permit,
                            Err(_) => break,
                        };
                        let backends = Arc::clone(&self.backends);
                        let policy = Arc::clone(&self.policy);
                        handlers.spawn(async move {
                            handle_connection(stream, peer.ip().to_string(), &backends, &policy)
                                .await;
                            drop(permit);
                        });
                    }
                    Err(e) => {
                        // Expected while the listener is being torn down
                        if *shutdown.borrow() {
                            break;
                        }
                        error!("Error accepting connection: {}", e);
                    }
                }
            }
        }

        // Stop accepting before the drain
        drop(self.listener);

        if timeout(DRAIN_TIMEOUT, drain(&mut handlers)).await.is_err() {
            warn!(
                "Forcing shutdown of {} in-flight connections",
                handlers.len()
            );
            handlers.abort_all();
        }

        info!("Listener stopped");
    }
}

async fn drain(handlers: &mut JoinSet<()>) {
    while handlers.join_next().await.is_some() {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, PolicyKind};

    fn fixtures() -> (Arc<BackendSet>, Arc<SelectionPolicy>) {
        let backends = Arc::new(BackendSet::from_config(&[BackendConfig {
            host: "127.0.0.1".to_string(),
            port: 9001,
            weight: 1,
        }]));
        let policy = Arc::new(SelectionPolicy::new(PolicyKind::RoundRobin));
        (backends, policy)
    }

    #[tokio::test]
    async fn test_bind_reports_local_addr() {
        let (backends, policy) = fixtures();
        let listener = Listener::bind("127.0.0.1", 0, 4, backends, policy)
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_an_error() {
        let (backends, policy) = fixtures();
        let first = Listener::bind(
            "127.0.0.1",
            0,
            4,
            Arc::clone(&backends),
            Arc::clone(&policy),
        )
        .await
        .unwrap();
        let port = first.local_addr().unwrap().port();

        let second = Listener::bind("127.0.0.1", port, 4, backends, policy).await;
        assert!(matches!(second, Err(CrossbarError::Network { .. })));
    }

    #[tokio::test]
    async fn test_unresolvable_host_is_an_error() {
        let (backends, policy) = fixtures();
        let result = Listener::bind("host.invalid.", 0, 4, backends, policy).await;
        assert!(matches!(result, Err(CrossbarError::Network { .. })));
    }
}
