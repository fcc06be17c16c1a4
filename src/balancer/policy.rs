use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use super::backend::Backend;
use crate::config::PolicyKind;

/// Backend selection policy, chosen once at startup.
///
/// All variants are safe for concurrent invocation: the round-robin cursor is
/// the only internal state and it advances atomically.
pub enum SelectionPolicy {
    /// Weighted round robin driven by a wrapping cursor
    RoundRobin { cursor: AtomicU32 },
    /// Backend with the fewest active connections, first wins on ties
    LeastConnections,
    /// Stable client-IP affinity via a 31-bit FNV-1a hash
    IpHash,
}

impl SelectionPolicy {
    pub fn new(kind: PolicyKind) -> Self {
        match kind {
            PolicyKind::RoundRobin => Self::RoundRobin {
                cursor: AtomicU32::new(0),
            },
            PolicyKind::LeastConnections => Self::LeastConnections,
            PolicyKind::IpHash => Self::IpHash,
        }
    }

    /// Select one backend from the available subset.
    ///
    /// Returns `None` iff `available` is empty.
    pub fn select(
        &self,
        available: &[Arc<Backend>],
        client_ip: &str,
    ) -> Option<Arc<Backend>> {
        if available.is_empty() {
            return None;
        }

        match self {
            SelectionPolicy::RoundRobin { cursor } => round_robin(available, cursor),
            SelectionPolicy::LeastConnections => least_connections(available),
            SelectionPolicy::IpHash => ip_hash(available, client_ip),
        }
    }
}

/// Weighted round robin: advance the cursor once per call, reduce it modulo
/// the total weight, and walk the running weight sums until it is covered.
/// A weight-2 backend owns two adjacent cursor values. Cursor wrap-around is
/// harmless under the modulus.
fn round_robin(available: &[Arc<Backend>], cursor: &AtomicU32) -> Option<Arc<Backend>> {
    let total_weight: u32 = available.iter().map(|b| b.weight()).sum();
    let slot = cursor.fetch_add(1, Ordering::Relaxed) % total_weight;

    let mut weight_sum = 0;
    for backend in available {
        weight_sum += backend.weight();
        if slot < weight_sum {
            return Some(Arc::clone(backend));
        }
    }

    // Unreachable: slot < total_weight by construction
    available.first().cloned()
}

/// The comparison across backends is not a consistent snapshot; each counter
/// read is atomic but concurrent handlers may shift counts mid-walk. That only
/// loosens optimality, never correctness.
fn least_connections(available: &[Arc<Backend>]) -> Option<Arc<Backend>> {
    let mut selected: Option<&Arc<Backend>> = None;
    let mut min_connections = usize::MAX;

    for backend in available {
        let connections = backend.active_connections();
        if connections < min_connections {
            min_connections = connections;
            selected = Some(backend);
        }
    }

    selected.cloned()
}

fn ip_hash(available: &[Arc<Backend>], client_ip: &str) -> Option<Arc<Backend>> {
    let hash = fnv1a_31(client_ip);
    let index = hash as usize % available.len();
    available.get(index).cloned()
}

/// FNV-1a over the IP string, masked to the lower 31 bits so the value is
/// non-negative under any later signed interpretation.
fn fnv1a_31(input: &str) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;

    let mut hash = OFFSET_BASIS;
    for byte in input.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash & 0x7fff_ffff
}
