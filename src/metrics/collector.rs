//! Metrics collector using prometheus-client.
//!
//! Provides metrics for connections, bytes forwarded, backend selection,
//! connection pools and backend health.

use crate::backend::BackendAddress;
use crate::pool::{PoolSet, PoolStats};
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::time::Duration;

/// Labels for per-backend metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct BackendLabels {
    pub backend: String,
}

impl BackendLabels {
    fn for_backend(address: &BackendAddress) -> Self {
        Self {
            backend: address.to_string(),
        }
    }
}

/// Labels for bytes transferred metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct BytesLabels {
    pub backend: String,
    pub direction: Direction,
}

/// Direction of bytes transfer.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Direction {
    ClientToBackend,
    BackendToClient,
}

/// Labels for dispatch failure metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct FailureLabels {
    pub reason: FailureReason,
}

/// Why a client connection was closed without reaching a backend.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum FailureReason {
    NoBackend,
    PoolExhausted,
    DialError,
    PoolClosed,
}

/// Labels for health check metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HealthCheckLabels {
    pub backend: String,
    pub result: HealthCheckResult,
}

/// Result of a health check.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum HealthCheckResult {
    Success,
    Failure,
}

/// Collects and stores all metrics.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<MetricsCollectorInner>,
}

struct MetricsCollectorInner {
    /// Accepted client connections.
    connections_total: Counter,
    /// Client connections currently being served.
    active_connections: Gauge,
    /// Bytes forwarded, per backend and direction.
    bytes_total: Family<BytesLabels, Counter>,
    /// Session duration histogram (in seconds).
    session_duration_seconds: Family<BackendLabels, Histogram>,
    /// Times each backend was picked by the algorithm.
    selections_total: Family<BackendLabels, Counter>,
    /// Client connections closed before reaching a backend.
    dispatch_failures_total: Family<FailureLabels, Counter>,
    /// Backend health gauge (1 = healthy, 0 = unhealthy).
    backend_health: Family<BackendLabels, Gauge>,
    /// Health check results counter.
    health_checks_total: Family<HealthCheckLabels, Counter>,
    /// Live pooled connections, idle included.
    pool_active: Family<BackendLabels, Gauge>,
    /// Idle pooled connections.
    pool_idle: Family<BackendLabels, Gauge>,
    /// The prometheus registry.
    registry: Registry,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let connections_total = Counter::default();
        let active_connections = Gauge::default();
        let bytes_total = Family::<BytesLabels, Counter>::default();
        let session_duration_seconds =
            Family::<BackendLabels, Histogram>::new_with_constructor(|| {
                // 1ms up to roughly 4 minutes
                Histogram::new(exponential_buckets(0.001, 4.0, 10))
            });
        let selections_total = Family::<BackendLabels, Counter>::default();
        let dispatch_failures_total = Family::<FailureLabels, Counter>::default();
        let backend_health = Family::<BackendLabels, Gauge>::default();
        let health_checks_total = Family::<HealthCheckLabels, Counter>::default();
        let pool_active = Family::<BackendLabels, Gauge>::default();
        let pool_idle = Family::<BackendLabels, Gauge>::default();

        registry.register(
            "tcplb_connections",
            "Total number of accepted client connections",
            connections_total.clone(),
        );
        registry.register(
            "tcplb_active_connections",
            "Number of client connections being served",
            active_connections.clone(),
        );
        registry.register(
            "tcplb_bytes",
            "Total bytes forwarded",
            bytes_total.clone(),
        );
        registry.register(
            "tcplb_session_duration_seconds",
            "Duration of forwarding sessions in seconds",
            session_duration_seconds.clone(),
        );
        registry.register(
            "tcplb_backend_selections",
            "Number of times a backend was selected",
            selections_total.clone(),
        );
        registry.register(
            "tcplb_dispatch_failures",
            "Client connections closed without reaching a backend",
            dispatch_failures_total.clone(),
        );
        registry.register(
            "tcplb_backend_health",
            "Backend health status (1=healthy, 0=unhealthy)",
            backend_health.clone(),
        );
        registry.register(
            "tcplb_health_checks",
            "Total number of health checks performed",
            health_checks_total.clone(),
        );
        registry.register(
            "tcplb_pool_active_connections",
            "Live pooled backend connections, idle included",
            pool_active.clone(),
        );
        registry.register(
            "tcplb_pool_idle_connections",
            "Pooled backend connections waiting for reuse",
            pool_idle.clone(),
        );

        Self {
            inner: Arc::new(MetricsCollectorInner {
                connections_total,
                active_connections,
                bytes_total,
                session_duration_seconds,
                selections_total,
                dispatch_failures_total,
                backend_health,
                health_checks_total,
                pool_active,
                pool_idle,
                registry,
            }),
        }
    }

    /// Get the prometheus registry for encoding.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Record an accepted client connection.
    pub fn connection_opened(&self) {
        self.inner.connections_total.inc();
        self.inner.active_connections.inc();
    }

    /// Record a client connection going away, whatever the outcome.
    pub fn connection_closed(&self) {
        self.inner.active_connections.dec();
    }

    /// Record a backend selection.
    pub fn record_selection(&self, backend: &BackendAddress) {
        self.inner
            .selections_total
            .get_or_create(&BackendLabels::for_backend(backend))
            .inc();
    }

    /// Record a client connection that never reached a backend.
    pub fn record_dispatch_failure(&self, reason: FailureReason) {
        self.inner
            .dispatch_failures_total
            .get_or_create(&FailureLabels { reason })
            .inc();
    }

    /// Record a completed forwarding session.
    pub fn record_session(
        &self,
        backend: &BackendAddress,
        bytes_to_backend: u64,
        bytes_to_client: u64,
        duration: Duration,
    ) {
        let name = backend.to_string();

        self.inner
            .session_duration_seconds
            .get_or_create(&BackendLabels {
                backend: name.clone(),
            })
            .observe(duration.as_secs_f64());

        self.inner
            .bytes_total
            .get_or_create(&BytesLabels {
                backend: name.clone(),
                direction: Direction::ClientToBackend,
            })
            .inc_by(bytes_to_backend);
        self.inner
            .bytes_total
            .get_or_create(&BytesLabels {
                backend: name,
                direction: Direction::BackendToClient,
            })
            .inc_by(bytes_to_client);
    }

    /// Update backend health status.
    pub fn set_backend_health(&self, backend: &BackendAddress, healthy: bool) {
        self.inner
            .backend_health
            .get_or_create(&BackendLabels::for_backend(backend))
            .set(if healthy { 1 } else { 0 });
    }

    /// Record a health check result.
    pub fn record_health_check(&self, backend: &BackendAddress, success: bool) {
        let labels = HealthCheckLabels {
            backend: backend.to_string(),
            result: if success {
                HealthCheckResult::Success
            } else {
                HealthCheckResult::Failure
            },
        };
        self.inner.health_checks_total.get_or_create(&labels).inc();
    }

    /// Publish a pool's occupancy.
    pub fn set_pool_stats(&self, backend: &BackendAddress, stats: &PoolStats) {
        let labels = BackendLabels::for_backend(backend);
        self.inner
            .pool_active
            .get_or_create(&labels)
            .set(stats.active as i64);
        self.inner
            .pool_idle
            .get_or_create(&labels)
            .set(stats.idle as i64);
    }

    /// Refresh the pool gauges from the live pools.
    ///
    /// Called right before encoding, so closed pools and idle sockets
    /// dropped as dead are reflected without waiting for more traffic.
    pub fn refresh_pool_gauges(&self, pools: &PoolSet) {
        for (backend, stats) in pools.all_stats() {
            self.set_pool_stats(&backend, &stats);
        }
    }

    /// Total accepted client connections.
    pub fn connections_accepted(&self) -> u64 {
        self.inner.connections_total.get()
    }

    /// Client connections being served right now.
    pub fn active_connections(&self) -> i64 {
        self.inner.active_connections.get()
    }

    /// Number of times `backend` was selected.
    pub fn selections(&self, backend: &BackendAddress) -> u64 {
        self.inner
            .selections_total
            .get_or_create(&BackendLabels::for_backend(backend))
            .get()
    }

    /// Number of dispatch failures for `reason`.
    pub fn dispatch_failures(&self, reason: FailureReason) -> u64 {
        self.inner
            .dispatch_failures_total
            .get_or_create(&FailureLabels { reason })
            .get()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("connections", &self.connections_accepted())
            .field("active", &self.active_connections())
            .finish()
    }
}
