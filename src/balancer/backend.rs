use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::BackendConfig;

/// A single backend origin receiving traffic from the load balancer.
///
/// Identity (host, port, weight) is immutable; availability and the
/// bookkeeping counters are lock-free atomics shared between the connection
/// handlers (readers) and the health supervisor (writer). The failure and
/// success streaks are mutually exclusive: incrementing one always resets the
/// other first.
pub struct Backend {
    host: String,
    port: u16,
    weight: u32,
    available: AtomicBool,
    active_connections: AtomicUsize,
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
}

impl Backend {
    pub fn new(host: impl Into<String>, port: u16, weight: u32) -> Self {
        Self {
            host: host.into(),
            port,
            weight,
            available: AtomicBool::new(true),
            active_connections: AtomicUsize::new(0),
            consecutive_failures: AtomicU32::new(0),
            consecutive_successes: AtomicU32::new(0),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// Backend address in `host:port` form
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Claim a connection slot; released when the lease is dropped
    pub fn lease(self: &Arc<Self>) -> ConnectionLease {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        ConnectionLease {
            backend: Arc::clone(self),
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes.load(Ordering::Relaxed)
    }

    /// Record a probe failure, returning the new failure streak length.
    /// Resets the success streak.
    pub fn record_failure(&self) -> u32 {
        self.consecutive_successes.store(0, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Record a probe success, returning the new success streak length.
    /// Resets the failure streak.
    pub fn record_success(&self) -> u32 {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn reset_successes(&self) {
        self.consecutive_successes.store(0, Ordering::Relaxed);
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Backend{{{}, weight={}, available={}, connections={}}}",
            self.address(),
            self.weight,
            self.is_available(),
            self.active_connections()
        )
    }
}

/// RAII guard holding one active-connection slot on a backend.
///
/// Dropping the lease decrements the counter, so every exit path of a
/// handler, including early returns and relay errors, releases the slot.
pub struct ConnectionLease {
    backend: Arc<Backend>,
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        self.backend
            .active_connections
            .fetch_sub(1, Ordering::Relaxed);
    }
}

/// Ordered, immutable set of backends built once at startup.
///
/// Order is significant: selection policies break ties by sequence position.
pub struct BackendSet {
    backends: Vec<Arc<Backend>>,
}

impl BackendSet {
    pub fn from_config(configs: &[BackendConfig]) -> Self {
        let backends = configs
            .iter()
            .map(|c| Arc::new(Backend::new(c.host.clone(), c.port, c.weight)))
            .collect();
        Self { backends }
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Backend>> {
        self.backends.iter()
    }

    /// Snapshot of the currently available subset, preserving order
    pub fn available(&self) -> Vec<Arc<Backend>> {
        self.backends
            .iter()
            .filter(|b| b.is_available())
            .cloned()
            .collect()
    }

    pub fn available_count(&self) -> usize {
        self.backends.iter().filter(|b| b.is_available()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_starts_available() {
        let backend = Backend::new("127.0.0.1", 9001, 1);
        assert!(backend.is_available());
        assert_eq!(backend.active_connections(), 0);
        assert_eq!(backend.consecutive_failures(), 0);
        assert_eq!(backend.consecutive_successes(), 0);
    }

    #[test]
    fn test_lease_releases_on_drop() {
        let backend = Arc::new(Backend::new("127.0.0.1", 9001, 1));

        {
            let _a = backend.lease();
            let _b = backend.lease();
            assert_eq!(backend.active_connections(), 2);
        }
        assert_eq!(backend.active_connections(), 0);
    }

    #[test]
    fn test_streaks_are_mutually_exclusive() {
        let backend = Backend::new("127.0.0.1", 9001, 1);

        assert_eq!(backend.record_failure(), 1);
        assert_eq!(backend.record_failure(), 2);
        assert_eq!(backend.consecutive_successes(), 0);

        assert_eq!(backend.record_success(), 1);
        assert_eq!(backend.consecutive_failures(), 0);
        assert_eq!(backend.consecutive_successes(), 1);

        assert_eq!(backend.record_failure(), 1);
        assert_eq!(backend.consecutive_successes(), 0);
    }

    #[test]
    fn test_available_snapshot_preserves_order() {
        let set = BackendSet::from_config(&[
            crate::config::BackendConfig {
                host: "a".to_string(),
                port: 1,
                weight: 1,
            },
            crate::config::BackendConfig {
                host: "b".to_string(),
                port: 2,
                weight: 1,
            },
            crate::config::BackendConfig {
                host: "c".to_string(),
                port: 3,
                weight: 1,
            },
        ]);

        set.iter().nth(1).unwrap().set_available(false);

        let available = set.available();
        assert_eq!(available.len(), 2);
        assert_eq!(available[0].host(), "a");
        assert_eq!(available[1].host(), "c");
        assert_eq!(set.available_count(), 2);
    }
}
