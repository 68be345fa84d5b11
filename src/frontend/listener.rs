//! Frontend listener implementation.
//!
//! Accepts client connections and hands each one to a backend.

use crate::backend::BackendAddress;
use crate::backend::algorithms::LoadBalancer;
use crate::metrics::FailureReason;
use crate::pool::PoolError;
use crate::proxy::{SpliceResult, splice};
use crate::state::AppState;
use crate::util::{ConnectionId, ShutdownReceiver};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Why a client connection could not be forwarded.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no healthy backend available")]
    NoBackend,

    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl DispatchError {
    /// Metric label for this failure.
    pub fn reason(&self) -> FailureReason {
        match self {
            DispatchError::NoBackend => FailureReason::NoBackend,
            DispatchError::Pool(PoolError::Exhausted(_)) => FailureReason::PoolExhausted,
            DispatchError::Pool(PoolError::Closed(_)) => FailureReason::PoolClosed,
            DispatchError::Pool(PoolError::Dial(..) | PoolError::ConnectTimeout(_)) => {
                FailureReason::DialError
            }
        }
    }
}

/// Summary of a finished session.
#[derive(Debug)]
struct Session {
    backend: BackendAddress,
    splice: SpliceResult,
    reused: bool,
    duration: Duration,
}

/// Keeps a backend's in-flight count raised while alive.
struct InFlight {
    balancer: Arc<dyn LoadBalancer>,
    backend: BackendAddress,
}

impl InFlight {
    fn new(balancer: Arc<dyn LoadBalancer>, backend: BackendAddress) -> Self {
        balancer.on_connect(&backend);
        Self { balancer, backend }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.balancer.on_disconnect(&self.backend);
    }
}

/// Frontend listener that accepts and dispatches connections.
pub struct FrontendListener {
    /// TCP listener.
    listener: TcpListener,
    /// Registry, algorithm, pools and metrics.
    state: AppState,
}

impl FrontendListener {
    /// Bind the listening socket.
    pub async fn bind(address: SocketAddr, state: AppState) -> io::Result<Self> {
        let listener = TcpListener::bind(address).await?;

        info!(
            listen = %listener.local_addr()?,
            algorithm = state.balancer.name(),
            backends = state.registry.len(),
            "frontend listener bound"
        );

        Ok(Self { listener, state })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the listener, accepting connections until shutdown.
    ///
    /// The listening socket is closed on return. Sessions already in
    /// progress keep running until one of their peers closes.
    pub async fn run(self, mut shutdown: ShutdownReceiver) {
        info!("frontend listener starting");

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }

                _ = shutdown.recv() => {
                    info!("frontend listener shutting down");
                    break;
                }
            }
        }
    }

    /// Spawn the task serving one client connection.
    fn handle_connection(&self, stream: TcpStream, client_addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "failed to set TCP_NODELAY on client connection");
        }

        let state = self.state.clone();
        let id = ConnectionId::new();
        let span = info_span!("connection", id = %id, client = %client_addr);
        state.metrics.connection_opened();

        let task = async move {
            match dispatch(&state, stream).await {
                Ok(session) => {
                    state.metrics.record_session(
                        &session.backend,
                        session.splice.bytes_to_backend,
                        session.splice.bytes_to_client,
                        session.duration,
                    );
                    info!(
                        backend = %session.backend,
                        reused = session.reused,
                        bytes_to_backend = session.splice.bytes_to_backend,
                        bytes_to_client = session.splice.bytes_to_client,
                        duration_ms = session.duration.as_millis(),
                        end = ?session.splice.end,
                        "session completed"
                    );
                }
                Err(e) => {
                    state.metrics.record_dispatch_failure(e.reason());
                    warn!(
                        error = %e,
                        "closing client connection"
                    );
                }
            }

            state.metrics.connection_closed();
        };
        tokio::spawn(task.instrument(span));
    }
}

/// Forward one client connection.
///
/// The client socket is closed when this returns, whatever the outcome.
async fn dispatch(state: &AppState, mut client: TcpStream) -> Result<Session, DispatchError> {
    let candidates = state.registry.healthy_backends();
    let backend = state
        .balancer
        .select(&candidates)
        .ok_or(DispatchError::NoBackend)?;
    let address = backend.address().clone();
    state.metrics.record_selection(&address);

    let _in_flight = InFlight::new(Arc::clone(&state.balancer), address.clone());

    let mut conn = state.pools.acquire(&address).await?;
    let reused = conn.is_reused();

    debug!(backend = %address, reused, "backend connection acquired");

    let start = Instant::now();
    let result = splice(&mut client, conn.stream_mut()).await;
    let duration = start.elapsed();

    if result.backend_reusable() {
        conn.release();
    } else {
        conn.discard();
    }

    Ok(Session {
        backend: address,
        splice: result,
        reused,
        duration,
    })
}
