//! Least-connections load balancing algorithm.

use super::{LoadBalancer, healthy_only};
use crate::backend::{Backend, BackendAddress};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Least-connections load balancer.
///
/// Sends connections to the healthy server with the fewest in-flight
/// connections. Ties go to the server that comes first in registry order.
pub struct LeastConnections {
    /// Active connection count per server.
    connections: DashMap<BackendAddress, AtomicU32>,
}

impl LeastConnections {
    /// Create a new least-connections load balancer.
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Get the connection count for a server.
    fn get_connections(&self, server: &BackendAddress) -> u32 {
        self.connections
            .get(server)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

impl Default for LeastConnections {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancer for LeastConnections {
    fn name(&self) -> &'static str {
        "least_connections"
    }

    fn select(&self, candidates: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        let mut min_conns = u32::MAX;
        let mut selected = None;

        // Strict comparison keeps the earliest backend on ties
        for backend in healthy_only(candidates) {
            let conns = self.get_connections(backend.address());
            if conns < min_conns {
                min_conns = conns;
                selected = Some(backend);
            }
        }

        selected.cloned()
    }

    fn on_connect(&self, server: &BackendAddress) {
        self.connections
            .entry(server.clone())
            .or_insert_with(|| AtomicU32::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    fn on_disconnect(&self, server: &BackendAddress) {
        if let Some(counter) = self.connections.get(server) {
            // Prevent underflow
            let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                current.checked_sub(1)
            });
        }
    }

    fn connection_count(&self, server: &BackendAddress) -> u32 {
        self.get_connections(server)
    }
}
