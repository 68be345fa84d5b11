//! Metrics collection and exposition.

mod collector;
mod server;

pub use collector::{Direction, FailureReason, HealthCheckResult, MetricsCollector};
pub use server::MetricsServer;
