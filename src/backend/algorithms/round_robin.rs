//! Round-robin load balancing algorithm.

use super::{LoadBalancer, healthy_only};
use crate::backend::Backend;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Round-robin load balancer.
///
/// Distributes requests evenly across the healthy servers in registry order.
/// The modulus is the healthy-set size at call time, so the cycle adapts
/// when backends go up or down.
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    /// Create a new round-robin load balancer.
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancer for RoundRobin {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn select(&self, candidates: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        let healthy = healthy_only(candidates);
        if healthy.is_empty() {
            return None;
        }

        let idx = self.counter.fetch_add(1, Ordering::Relaxed) % healthy.len();
        Some(Arc::clone(healthy[idx]))
    }
}
