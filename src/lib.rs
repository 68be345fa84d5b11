//! tcplb - a Layer 4 TCP load balancer
//!
//! Client connections are accepted on one address and each is spliced,
//! byte for byte, to a backend chosen by a pluggable algorithm among the
//! backends that currently pass health checks:
//! - Round-robin and least-connections selection
//! - Active TCP health checking
//! - Per-backend connection pooling with liveness probes
//! - Prometheus metrics

pub mod backend;
pub mod config;
pub mod frontend;
pub mod health;
pub mod metrics;
pub mod pool;
pub mod proxy;
pub mod server;
pub mod state;
pub mod util;

pub use config::Config;
pub use server::{Server, ServerError};
