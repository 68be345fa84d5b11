//! Shared application state.

use crate::backend::BackendRegistry;
use crate::backend::algorithms::{self, LoadBalancer};
use crate::config::Config;
use crate::metrics::MetricsCollector;
use crate::pool::PoolSet;
use std::sync::Arc;

/// Shared state accessible from every dispatching task.
#[derive(Clone)]
pub struct AppState {
    /// Configured backends and their health flags.
    pub registry: Arc<BackendRegistry>,

    /// Selection algorithm shared by all connections.
    pub balancer: Arc<dyn LoadBalancer>,

    /// Per-backend connection pools.
    pub pools: Arc<PoolSet>,

    /// Metrics collector.
    pub metrics: MetricsCollector,
}

impl AppState {
    /// Assemble state around an existing registry.
    pub fn new(registry: Arc<BackendRegistry>, config: &Config, metrics: MetricsCollector) -> Self {
        Self {
            registry,
            balancer: algorithms::build(config.load_balancer.algorithm),
            pools: Arc::new(PoolSet::new(config.pool.clone())),
            metrics,
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("backends", &self.registry.len())
            .field("algorithm", &self.balancer.name())
            .finish()
    }
}
