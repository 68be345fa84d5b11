//! Per-backend pool of reusable TCP connections.

use crate::backend::BackendAddress;
use crate::config::PoolConfig;
use parking_lot::Mutex;
use socket2::SockRef;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, instrument, trace, warn};

/// Connection pool error.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("connection pool for {0} exhausted")]
    Exhausted(BackendAddress),

    #[error("failed to connect to backend {0}: {1}")]
    Dial(BackendAddress, io::Error),

    #[error("connection timeout to backend {0}")]
    ConnectTimeout(BackendAddress),

    #[error("connection pool for {0} is closed")]
    Closed(BackendAddress),
}

/// Point-in-time counters for one pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Live connections, idle plus checked out.
    pub active: usize,
    /// Connections waiting in the pool.
    pub idle: usize,
    /// Configured ceiling for `active`.
    pub max_size: usize,
    /// Connections dialed since the pool was created.
    pub dials: u64,
    /// Acquisitions served from an idle connection.
    pub reuses: u64,
    /// Acquisitions rejected because the pool was full.
    pub exhausted: u64,
    /// Connections closed because they were dead, surplus or abandoned.
    pub discarded: u64,
}

struct PoolState {
    idle: VecDeque<TcpStream>,
    active: usize,
    closed: bool,
}

struct PoolInner {
    address: BackendAddress,
    max_size: usize,
    max_idle: usize,
    connect_timeout: Duration,
    probe_timeout: Duration,
    state: Mutex<PoolState>,
    dials: AtomicU64,
    reuses: AtomicU64,
    exhausted: AtomicU64,
    discarded: AtomicU64,
}

impl PoolInner {
    /// Give up a slot whose socket has already been dropped.
    fn forget_one(&self) {
        let mut state = self.state.lock();
        state.active = state.active.saturating_sub(1);
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }
}

/// Bounded cache of connections to a single backend.
///
/// Invariant: `active <= max_size`, where `active` counts idle connections
/// plus connections currently handed out. A handed-out connection is owned
/// exclusively by its [`PooledConnection`] until released or dropped.
/// Cloning the pool yields another handle to the same state.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Create an empty pool for a backend.
    pub fn new(address: BackendAddress, config: &PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                address,
                max_size: config.max_size,
                max_idle: config.max_idle.min(config.max_size),
                connect_timeout: config.connect_timeout,
                probe_timeout: config.probe_timeout,
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    active: 0,
                    closed: false,
                }),
                dials: AtomicU64::new(0),
                reuses: AtomicU64::new(0),
                exhausted: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
            }),
        }
    }

    /// The backend this pool connects to.
    pub fn address(&self) -> &BackendAddress {
        &self.inner.address
    }

    /// Get a connection, reusing an idle one when it is still alive.
    ///
    /// Idle connections that fail the liveness probe are closed and the next
    /// one is tried; when none is left a new connection is dialed, provided
    /// the pool is below `max_size`.
    #[instrument(skip_all, fields(backend = %self.inner.address))]
    pub async fn acquire(&self) -> Result<PooledConnection, PoolError> {
        loop {
            let candidate = {
                let mut state = self.inner.state.lock();
                if state.closed {
                    return Err(PoolError::Closed(self.inner.address.clone()));
                }
                state.idle.pop_front()
            };

            let Some(stream) = candidate else {
                break;
            };

            if is_alive(&stream, self.inner.probe_timeout).await {
                self.inner.reuses.fetch_add(1, Ordering::Relaxed);
                trace!("reusing idle connection");
                return Ok(PooledConnection::new(stream, Arc::clone(&self.inner), true));
            }

            debug!("discarding dead idle connection");
            drop(stream);
            self.inner.forget_one();
        }

        self.dial().await
    }

    /// Return a connection for reuse.
    ///
    /// The connection is kept if the pool has idle capacity, otherwise it is
    /// closed and its slot freed.
    pub fn release(&self, conn: PooledConnection) {
        conn.release();
    }

    /// Close every idle connection and refuse further acquisitions.
    ///
    /// Checked-out connections are closed by their holders.
    pub fn close(&self) {
        let drained: Vec<TcpStream> = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            let drained: Vec<TcpStream> = state.idle.drain(..).collect();
            state.active = state.active.saturating_sub(drained.len());
            drained
        };

        if !drained.is_empty() {
            debug!(
                backend = %self.inner.address,
                closed = drained.len(),
                "closed idle pool connections"
            );
        }
    }

    /// Current pool counters.
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            active: state.active,
            idle: state.idle.len(),
            max_size: self.inner.max_size,
            dials: self.inner.dials.load(Ordering::Relaxed),
            reuses: self.inner.reuses.load(Ordering::Relaxed),
            exhausted: self.inner.exhausted.load(Ordering::Relaxed),
            discarded: self.inner.discarded.load(Ordering::Relaxed),
        }
    }

    /// Reserve a slot and dial a new connection into it.
    async fn dial(&self) -> Result<PooledConnection, PoolError> {
        {
            let mut state = self.inner.state.lock();
            if state.active >= self.inner.max_size {
                drop(state);
                self.inner.exhausted.fetch_add(1, Ordering::Relaxed);
                return Err(PoolError::Exhausted(self.inner.address.clone()));
            }
            state.active += 1;
        }

        match connect_to_backend(&self.inner.address, self.inner.connect_timeout).await {
            Ok(stream) => {
                self.inner.dials.fetch_add(1, Ordering::Relaxed);
                Ok(PooledConnection::new(stream, Arc::clone(&self.inner), false))
            }
            Err(e) => {
                let mut state = self.inner.state.lock();
                state.active = state.active.saturating_sub(1);
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("address", &self.inner.address)
            .field("stats", &self.stats())
            .finish()
    }
}

/// A connection checked out of a [`ConnectionPool`].
///
/// Dropping it without calling [`release`](Self::release) closes the socket
/// and frees its slot.
pub struct PooledConnection {
    stream: Option<TcpStream>,
    pool: Arc<PoolInner>,
    reused: bool,
}

impl PooledConnection {
    fn new(stream: TcpStream, pool: Arc<PoolInner>, reused: bool) -> Self {
        Self {
            stream: Some(stream),
            pool,
            reused,
        }
    }

    /// The backend this connection belongs to.
    pub fn address(&self) -> &BackendAddress {
        &self.pool.address
    }

    /// Whether this connection came from the idle cache.
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    /// Mutable access to the underlying socket.
    pub fn stream_mut(&mut self) -> &mut TcpStream {
        self.stream
            .as_mut()
            .expect("pooled connection used after release")
    }

    /// Hand the connection back to its pool.
    pub fn release(mut self) {
        let Some(stream) = self.stream.take() else {
            return;
        };

        let rejected = {
            let mut state = self.pool.state.lock();
            if !state.closed && state.idle.len() < self.pool.max_idle {
                state.idle.push_back(stream);
                None
            } else {
                state.active = state.active.saturating_sub(1);
                Some(stream)
            }
        };

        if rejected.is_some() {
            self.pool.discarded.fetch_add(1, Ordering::Relaxed);
            trace!(backend = %self.pool.address, "pool full, closing returned connection");
        }
    }

    /// Close the connection instead of returning it.
    pub fn discard(mut self) {
        if self.stream.take().is_some() {
            self.pool.forget_one();
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if self.stream.take().is_some() {
            self.pool.forget_one();
        }
    }
}

/// Connect to a backend server with timeout.
#[instrument(skip_all, fields(backend = %addr))]
pub async fn connect_to_backend(
    addr: &BackendAddress,
    connect_timeout: Duration,
) -> Result<TcpStream, PoolError> {
    debug!("connecting to backend");

    match timeout(connect_timeout, TcpStream::connect(addr.connect_target())).await {
        Ok(Ok(stream)) => {
            debug!("connected to backend");
            // Set TCP_NODELAY for lower latency
            if let Err(e) = stream.set_nodelay(true) {
                warn!(error = %e, "failed to set TCP_NODELAY on backend connection");
            }
            // Idle pooled sockets rely on keepalive to notice silent peers
            if let Err(e) = SockRef::from(&stream).set_keepalive(true) {
                warn!(error = %e, "failed to set SO_KEEPALIVE on backend connection");
            }
            Ok(stream)
        }
        Ok(Err(e)) => {
            debug!(error = %e, "failed to connect to backend");
            Err(PoolError::Dial(addr.clone(), e))
        }
        Err(_) => {
            debug!("connection timeout");
            Err(PoolError::ConnectTimeout(addr.clone()))
        }
    }
}

/// Liveness probe for an idle connection.
///
/// Peeks with a short deadline: hitting the deadline means the peer is
/// silent and the socket reusable. EOF, an error, or unread bytes left by a
/// previous session all make it unusable.
async fn is_alive(stream: &TcpStream, probe_timeout: Duration) -> bool {
    let mut buf = [0u8; 1];
    match timeout(probe_timeout, stream.peek(&mut buf)).await {
        Err(_) => true,
        Ok(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    fn pool_config(max_size: usize) -> PoolConfig {
        PoolConfig {
            max_size,
            max_idle: max_size,
            connect_timeout: Duration::from_secs(2),
            probe_timeout: Duration::from_millis(5),
        }
    }

    /// Listener that hands accepted sockets to the test so it can close them.
    async fn start_backend() -> (SocketAddr, mpsc::UnboundedReceiver<TcpStream>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                if tx.send(stream).is_err() {
                    break;
                }
            }
        });

        (addr, rx)
    }

    #[tokio::test]
    async fn test_acquire_release_reuses_connection() {
        let (addr, _accepted) = start_backend().await;
        let pool = ConnectionPool::new(addr.into(), &pool_config(4));

        let conn = pool.acquire().await.unwrap();
        assert!(!conn.is_reused());
        pool.release(conn);

        let conn = pool.acquire().await.unwrap();
        assert!(conn.is_reused());

        let stats = pool.stats();
        assert_eq!(stats.dials, 1);
        assert_eq!(stats.reuses, 1);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.idle, 0);
    }

    #[tokio::test]
    async fn test_exhausted_until_release() {
        let (addr, _accepted) = start_backend().await;
        let pool = ConnectionPool::new(addr.into(), &pool_config(2));

        let first = pool.acquire().await.unwrap();
        let _second = pool.acquire().await.unwrap();

        match pool.acquire().await {
            Err(PoolError::Exhausted(backend)) => assert_eq!(backend, BackendAddress::from(addr)),
            other => panic!("expected exhaustion, got {:?}", other.map(|_| ())),
        }
        assert_eq!(pool.stats().active, 2);
        assert_eq!(pool.stats().exhausted, 1);

        pool.release(first);
        let third = pool.acquire().await.unwrap();
        assert!(third.is_reused());
        assert_eq!(pool.stats().dials, 2);
    }

    #[tokio::test]
    async fn test_dead_idle_connection_is_replaced() {
        let (addr, mut accepted) = start_backend().await;
        let pool = ConnectionPool::new(addr.into(), &pool_config(2));

        let conn = pool.acquire().await.unwrap();
        pool.release(conn);

        // Backend closes its end of the idle connection
        let server_side = accepted.recv().await.unwrap();
        drop(server_side);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let conn = pool.acquire().await.unwrap();
        assert!(!conn.is_reused());

        let stats = pool.stats();
        assert_eq!(stats.dials, 2);
        assert_eq!(stats.discarded, 1);
        assert_eq!(stats.active, 1);
    }

    #[tokio::test]
    async fn test_unread_bytes_make_connection_unusable() {
        let (addr, mut accepted) = start_backend().await;
        let pool = ConnectionPool::new(addr.into(), &pool_config(2));

        let conn = pool.acquire().await.unwrap();
        pool.release(conn);

        let mut server_side = accepted.recv().await.unwrap();
        server_side.write_all(b"stale").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let conn = pool.acquire().await.unwrap();
        assert!(!conn.is_reused());
        assert_eq!(pool.stats().dials, 2);
    }

    #[tokio::test]
    async fn test_dial_error_frees_slot() {
        // Bind then drop to get a port nobody listens on
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let pool = ConnectionPool::new(addr.into(), &pool_config(1));

        assert!(matches!(pool.acquire().await, Err(PoolError::Dial(_, _))));
        assert!(matches!(pool.acquire().await, Err(PoolError::Dial(_, _))));
        assert_eq!(pool.stats().active, 0);
        assert_eq!(pool.stats().exhausted, 0);
    }

    #[tokio::test]
    async fn test_dial_timeout() {
        // Non-routable address to trigger timeout
        let mut config = pool_config(1);
        config.connect_timeout = Duration::from_millis(100);
        let pool = ConnectionPool::new(BackendAddress::new("10.255.255.1", 12345), &config);

        let result = pool.acquire().await;
        assert!(result.is_err());
        assert_eq!(pool.stats().active, 0);
    }

    #[tokio::test]
    async fn test_release_over_max_idle_closes() {
        let (addr, _accepted) = start_backend().await;
        let mut config = pool_config(3);
        config.max_idle = 1;
        let pool = ConnectionPool::new(addr.into(), &config);

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        pool.release(a);
        pool.release(b);

        let stats = pool.stats();
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.discarded, 1);
    }

    #[tokio::test]
    async fn test_dropped_connection_frees_slot() {
        let (addr, _accepted) = start_backend().await;
        let pool = ConnectionPool::new(addr.into(), &pool_config(1));

        let conn = pool.acquire().await.unwrap();
        drop(conn);
        assert_eq!(pool.stats().active, 0);

        let conn = pool.acquire().await.unwrap();
        conn.discard();
        assert_eq!(pool.stats().active, 0);
        assert_eq!(pool.stats().discarded, 2);
    }

    #[tokio::test]
    async fn test_close_drains_idle_and_rejects() {
        let (addr, _accepted) = start_backend().await;
        let pool = ConnectionPool::new(addr.into(), &pool_config(2));

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        pool.release(a);

        pool.close();
        assert_eq!(pool.stats().idle, 0);
        assert_eq!(pool.stats().active, 1);

        // The holder's connection is closed on return rather than cached
        pool.release(b);
        assert_eq!(pool.stats().active, 0);
        assert!(matches!(pool.acquire().await, Err(PoolError::Closed(_))));
    }
}
