//! Health checking for backend servers.

mod checker;

pub use checker::{
    HealthChecker, HealthCheckerHandle, HealthEvent, ProbeError, probe_backend,
};
