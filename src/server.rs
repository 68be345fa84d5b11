//! Top-level load balancer handle.
//!
//! Wires the registry, health checker, pools, dispatcher and metrics
//! endpoint together and owns their background tasks.

use crate::backend::{BackendAddress, BackendRegistry, RegistryError};
use crate::config::{Config, validate_config};
use crate::frontend::FrontendListener;
use crate::health::{HealthChecker, HealthCheckerHandle, HealthEvent};
use crate::metrics::{MetricsCollector, MetricsServer};
use crate::pool::PoolStats;
use crate::state::AppState;
use crate::util::ShutdownSignal;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Errors that prevent the server from starting.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("failed to bind listener on {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind metrics server on {address}: {source}")]
    MetricsBind {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// A running load balancer.
pub struct Server {
    local_addr: SocketAddr,
    metrics_addr: Option<SocketAddr>,
    state: AppState,
    shutdown: ShutdownSignal,
    health: HealthCheckerHandle,
    listener_task: JoinHandle<()>,
    metrics_task: Option<JoinHandle<()>>,
}

impl Server {
    /// Validate `config`, bind every socket and start the background tasks.
    ///
    /// The first health check cycle starts right away; until it completes
    /// every backend is unhealthy and clients are closed immediately.
    pub async fn start(config: &Config) -> Result<Self, ServerError> {
        validate_config(config).map_err(ServerError::Config)?;

        let registry = Arc::new(BackendRegistry::from_config(&config.backends)?);
        let metrics = MetricsCollector::new();
        let state = AppState::new(Arc::clone(&registry), config, metrics.clone());

        let address = config.load_balancer.listen_address;
        let listener = FrontendListener::bind(address, state.clone())
            .await
            .map_err(|source| ServerError::Bind { address, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { address, source })?;

        let metrics_server = if config.global.metrics.enabled {
            let address = config.global.metrics.address;
            let server = MetricsServer::bind(
                address,
                config.global.metrics.path.clone(),
                metrics.clone(),
                Arc::clone(&registry),
                Arc::clone(&state.pools),
            )
            .await
            .map_err(|source| ServerError::MetricsBind { address, source })?;
            Some(server)
        } else {
            None
        };
        let metrics_addr = metrics_server
            .as_ref()
            .and_then(|server| server.local_addr().ok());

        let shutdown = ShutdownSignal::new();
        let health = HealthChecker::new(Arc::clone(&registry), &config.health_check, metrics).spawn();
        let listener_task = tokio::spawn(listener.run(shutdown.subscribe()));
        let metrics_task = metrics_server.map(|server| tokio::spawn(server.run(shutdown.subscribe())));

        info!(
            listen = %local_addr,
            algorithm = state.balancer.name(),
            backends = registry.len(),
            metrics = ?metrics_addr,
            "load balancer started"
        );

        Ok(Self {
            local_addr,
            metrics_addr,
            state,
            shutdown,
            health,
            listener_task,
            metrics_task,
        })
    }

    /// Start with `config` and run until `signal` completes.
    pub async fn run<F>(config: &Config, signal: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let server = Self::start(config).await?;
        signal.await;
        info!("received shutdown signal");
        server.stop();
        server.wait().await;
        Ok(())
    }

    /// Address clients connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address of the metrics endpoint, if enabled.
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_addr
    }

    /// The backend registry.
    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.state.registry
    }

    /// Number of backends currently flagged healthy.
    pub fn healthy_backend_count(&self) -> usize {
        self.state.registry.healthy_count()
    }

    /// Statistics for every backend pool that has been used.
    pub fn pool_stats(&self) -> Vec<(BackendAddress, PoolStats)> {
        self.state.pools.all_stats()
    }

    /// In-flight connections the algorithm tracks for a backend.
    ///
    /// Always zero under round robin, which keeps no such state.
    pub fn connection_count(&self, backend: &BackendAddress) -> u32 {
        self.state.balancer.connection_count(backend)
    }

    /// The metrics collector.
    pub fn metrics(&self) -> &MetricsCollector {
        &self.state.metrics
    }

    /// Subscribe to backend health transitions.
    pub fn subscribe_health(&self) -> broadcast::Receiver<HealthEvent> {
        self.health.subscribe()
    }

    /// A signal that stops this server when triggered.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Stop accepting clients, stop health checks and close idle pooled
    /// connections. Sessions in progress finish on their own.
    ///
    /// Safe to call more than once.
    pub fn stop(&self) {
        self.shutdown.shutdown();
        self.health.stop();
        self.state.pools.close_all();
    }

    /// Wait until the server has been stopped and its tasks have exited.
    ///
    /// Stopping may come from [`Server::stop`] or from the signal returned
    /// by [`Server::shutdown_signal`].
    pub async fn wait(self) {
        if let Err(e) = self.listener_task.await {
            warn!(error = %e, "listener task failed");
        }

        // The listener only exits on shutdown; finish the rest of it
        self.health.stop();
        self.state.pools.close_all();

        if let Some(task) = self.metrics_task {
            if let Err(e) = task.await {
                warn!(error = %e, "metrics task failed");
            }
        }
        self.health.join().await;

        info!("load balancer stopped");
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("metrics_addr", &self.metrics_addr)
            .field("state", &self.state)
            .finish()
    }
}
