//! Active health checker.
//!
//! Periodically probes backend servers to verify they are reachable.

use crate::backend::{Backend, BackendAddress, BackendRegistry};
use crate::config::HealthCheckConfig;
use crate::metrics::MetricsCollector;
use crate::util::{ShutdownReceiver, ShutdownSignal};
use futures::future::join_all;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, info, warn};

/// Capacity of the health event channel.
const EVENT_CAPACITY: usize = 64;

/// A change in a backend's health.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    /// The backend answered a probe after being unhealthy.
    BecameHealthy(BackendAddress),
    /// The backend stopped answering probes.
    BecameUnhealthy {
        address: BackendAddress,
        reason: String,
    },
}

impl HealthEvent {
    /// The backend this event is about.
    pub fn address(&self) -> &BackendAddress {
        match self {
            HealthEvent::BecameHealthy(address) => address,
            HealthEvent::BecameUnhealthy { address, .. } => address,
        }
    }
}

/// Why a probe failed.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("connection failed: {0}")]
    Connect(#[from] io::Error),

    #[error("connection timeout after {0:?}")]
    Timeout(Duration),
}

/// Probe a backend by opening and immediately closing a TCP connection.
pub async fn probe_backend(address: &BackendAddress, limit: Duration) -> Result<(), ProbeError> {
    match timeout(limit, TcpStream::connect(address.connect_target())).await {
        Ok(Ok(_stream)) => Ok(()),
        Ok(Err(e)) => Err(ProbeError::Connect(e)),
        Err(_) => Err(ProbeError::Timeout(limit)),
    }
}

/// Active health checker that probes every registered backend.
///
/// It is the only writer of backend health flags.
pub struct HealthChecker {
    registry: Arc<BackendRegistry>,
    interval: Duration,
    timeout: Duration,
    events: broadcast::Sender<HealthEvent>,
    metrics: MetricsCollector,
}

impl HealthChecker {
    /// Create a new health checker.
    pub fn new(
        registry: Arc<BackendRegistry>,
        config: &HealthCheckConfig,
        metrics: MetricsCollector,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            registry,
            interval: config.interval,
            timeout: config.timeout,
            events,
            metrics,
        }
    }

    /// Subscribe to health transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.events.subscribe()
    }

    /// Probe every backend once, concurrently.
    ///
    /// Each result is applied as soon as its probe finishes, so a slow
    /// backend never delays the others. Returns the number of healthy
    /// backends afterwards.
    pub async fn check_all(&self) -> usize {
        let backends = self.registry.all_backends();
        join_all(backends.iter().map(|backend| self.check_backend(backend))).await;
        self.registry.healthy_count()
    }

    async fn check_backend(&self, backend: &Backend) {
        let address = backend.address();
        let result = probe_backend(address, self.timeout).await;
        backend.mark_checked();

        self.metrics.record_health_check(address, result.is_ok());
        self.metrics.set_backend_health(address, result.is_ok());

        match result {
            Ok(()) => {
                debug!(backend = %address, "health check passed");
                if !backend.set_healthy(true) {
                    info!(backend = %address, "backend became healthy");
                    let _ = self.events.send(HealthEvent::BecameHealthy(address.clone()));
                }
            }
            Err(e) => {
                debug!(backend = %address, error = %e, "health check failed");
                if backend.set_healthy(false) {
                    warn!(backend = %address, error = %e, "backend became unhealthy");
                    let _ = self.events.send(HealthEvent::BecameUnhealthy {
                        address: address.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    /// Run check cycles until shutdown.
    ///
    /// The first cycle starts immediately. A cycle still in flight when
    /// shutdown arrives is abandoned; dropping its probes closes their
    /// sockets.
    pub async fn run(self, mut shutdown: ShutdownReceiver) {
        info!(
            backends = self.registry.len(),
            interval = ?self.interval,
            timeout = ?self.timeout,
            "health checker starting"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    info!("health checker shutting down");
                    break;
                }

                _ = async {
                    ticker.tick().await;
                    self.check_all().await
                } => {}
            }
        }
    }

    /// Run on a background task.
    pub fn spawn(self) -> HealthCheckerHandle {
        let signal = ShutdownSignal::new();
        let events = self.events.clone();
        let task = tokio::spawn(self.run(signal.subscribe()));
        HealthCheckerHandle {
            signal,
            events,
            task,
        }
    }
}

/// Handle to a health checker running in the background.
#[derive(Debug)]
pub struct HealthCheckerHandle {
    signal: ShutdownSignal,
    events: broadcast::Sender<HealthEvent>,
    task: JoinHandle<()>,
}

impl HealthCheckerHandle {
    /// Subscribe to health transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.events.subscribe()
    }

    /// Ask the checker to stop. Safe to call any number of times.
    pub fn stop(&self) {
        self.signal.shutdown();
    }

    /// Stop the checker and wait for its task to exit.
    pub async fn join(self) {
        self.stop();
        if let Err(e) = self.task.await {
            warn!(error = %e, "health checker task failed");
        }
    }
}
