//! Backend connection pooling.

mod connection_pool;
mod set;

pub use connection_pool::{
    ConnectionPool, PoolError, PoolStats, PooledConnection, connect_to_backend,
};
pub use set::PoolSet;
