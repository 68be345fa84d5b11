//! Load balancing algorithms.

mod least_conn;
mod round_robin;

pub use least_conn::LeastConnections;
pub use round_robin::RoundRobin;

use crate::backend::{Backend, BackendAddress};
use crate::config::Algorithm;
use std::sync::Arc;

/// Trait for load balancing algorithms.
///
/// Implementations own their selection state and are shared by every
/// dispatching task, so all methods take `&self`.
pub trait LoadBalancer: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Select the next backend server.
    ///
    /// # Arguments
    ///
    /// * `candidates` - Backends in registry order
    ///
    /// # Returns
    ///
    /// The selected backend, or None if no candidate is healthy. Unhealthy
    /// candidates are never returned even if passed in.
    fn select(&self, candidates: &[Arc<Backend>]) -> Option<Arc<Backend>>;

    /// Notify that a connection to a backend was established.
    fn on_connect(&self, _backend: &BackendAddress) {}

    /// Notify that a connection to a backend was closed.
    fn on_disconnect(&self, _backend: &BackendAddress) {}

    /// In-flight connections tracked for a backend.
    fn connection_count(&self, _backend: &BackendAddress) -> u32 {
        0
    }
}

/// Build the configured algorithm.
pub fn build(algorithm: Algorithm) -> Arc<dyn LoadBalancer> {
    match algorithm {
        Algorithm::RoundRobin => Arc::new(RoundRobin::new()),
        Algorithm::LeastConnections => Arc::new(LeastConnections::new()),
    }
}

/// Candidates whose health flag is currently set, in order.
fn healthy_only(candidates: &[Arc<Backend>]) -> Vec<&Arc<Backend>> {
    candidates.iter().filter(|b| b.is_healthy()).collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Backends on 127.0.0.1:9001.. with the given health flags.
    pub fn backends(health: &[bool]) -> Vec<Arc<Backend>> {
        health
            .iter()
            .enumerate()
            .map(|(i, healthy)| {
                let backend = Backend::new(BackendAddress::new("127.0.0.1", 9001 + i as u16));
                backend.set_healthy(*healthy);
                Arc::new(backend)
            })
            .collect()
    }
}
