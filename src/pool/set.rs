//! Pools for every backend, keyed by identity.

use crate::backend::BackendAddress;
use crate::config::PoolConfig;
use crate::pool::{ConnectionPool, PoolError, PoolStats, PooledConnection};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// One [`ConnectionPool`] per backend.
///
/// Each backend's pool has its own lock, so traffic to different backends
/// never contends. Pools are created on first use.
#[derive(Debug)]
pub struct PoolSet {
    pools: DashMap<BackendAddress, ConnectionPool>,
    config: PoolConfig,
    closed: AtomicBool,
}

impl PoolSet {
    /// Create an empty set; every pool it creates uses `config`.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            pools: DashMap::new(),
            config,
            closed: AtomicBool::new(false),
        }
    }

    /// The pool for a backend, creating it if needed.
    pub fn pool_for(&self, address: &BackendAddress) -> ConnectionPool {
        if let Some(pool) = self.pools.get(address) {
            return pool.value().clone();
        }

        self.pools
            .entry(address.clone())
            .or_insert_with(|| {
                let pool = ConnectionPool::new(address.clone(), &self.config);
                if self.closed.load(Ordering::Acquire) {
                    pool.close();
                }
                pool
            })
            .value()
            .clone()
    }

    /// Acquire a connection to `address`.
    pub async fn acquire(&self, address: &BackendAddress) -> Result<PooledConnection, PoolError> {
        self.pool_for(address).acquire().await
    }

    /// Statistics for a single backend, if it has a pool.
    pub fn stats(&self, address: &BackendAddress) -> Option<PoolStats> {
        self.pools.get(address).map(|pool| pool.stats())
    }

    /// Statistics for every pool, ordered by backend identity.
    pub fn all_stats(&self) -> Vec<(BackendAddress, PoolStats)> {
        let mut stats: Vec<_> = self
            .pools
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().stats()))
            .collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }

    /// Close every pool's idle connections.
    pub fn close_all(&self) {
        self.closed.store(true, Ordering::Release);
        for entry in self.pools.iter() {
            entry.value().close();
        }
        info!(pools = self.pools.len(), "connection pools closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn listening_backend() -> BackendAddress {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        addr.into()
    }

    fn config() -> PoolConfig {
        PoolConfig {
            max_size: 1,
            max_idle: 1,
            connect_timeout: Duration::from_secs(1),
            probe_timeout: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_pools_are_independent() {
        let a = listening_backend().await;
        let b = listening_backend().await;
        let pools = PoolSet::new(config());

        let _conn_a = pools.acquire(&a).await.unwrap();
        // A full pool for one backend does not affect another
        assert!(matches!(pools.acquire(&a).await, Err(PoolError::Exhausted(_))));
        let _conn_b = pools.acquire(&b).await.unwrap();

        assert_eq!(pools.stats(&a).unwrap().active, 1);
        assert_eq!(pools.stats(&b).unwrap().active, 1);
        assert_eq!(pools.all_stats().len(), 2);
    }

    #[tokio::test]
    async fn test_same_pool_returned() {
        let a = listening_backend().await;
        let pools = PoolSet::new(config());

        let conn = pools.acquire(&a).await.unwrap();
        conn.release();
        let conn = pools.pool_for(&a).acquire().await.unwrap();
        assert!(conn.is_reused());
    }

    #[tokio::test]
    async fn test_close_all_covers_later_pools() {
        let a = listening_backend().await;
        let pools = PoolSet::new(config());
        pools.close_all();

        assert!(matches!(pools.acquire(&a).await, Err(PoolError::Closed(_))));
        assert!(pools.stats(&BackendAddress::new("127.0.0.1", 1)).is_none());
    }
}
