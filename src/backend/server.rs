//! A single upstream server and its live health flag.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Identity of a backend: host and port, exactly as configured.
///
/// The host is kept unresolved so that name-based backends (`localhost`)
/// are re-resolved on every dial and probe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BackendAddress {
    pub host: String,
    pub port: u16,
}

impl BackendAddress {
    /// Create a new backend address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Target usable with `TcpStream::connect`.
    pub fn connect_target(&self) -> (&str, u16) {
        (self.host.as_str(), self.port)
    }
}

impl From<std::net::SocketAddr> for BackendAddress {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for BackendAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A backend server registered with the load balancer.
///
/// The health flag is written only by the health checker and read
/// lock-free by every dispatching task.
#[derive(Debug)]
pub struct Backend {
    address: BackendAddress,
    /// Is this server currently healthy?
    healthy: AtomicBool,
    /// Unix timestamp (milliseconds) of the last health check, 0 if never checked.
    last_checked: AtomicU64,
}

impl Backend {
    /// Create a backend that has not been proven healthy yet.
    pub fn new(address: BackendAddress) -> Self {
        Self {
            address,
            healthy: AtomicBool::new(false),
            last_checked: AtomicU64::new(0),
        }
    }

    /// The backend's identity.
    pub fn address(&self) -> &BackendAddress {
        &self.address
    }

    /// Check if the backend is healthy.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Set the health flag, returning the previous value.
    pub fn set_healthy(&self, healthy: bool) -> bool {
        self.healthy.swap(healthy, Ordering::AcqRel)
    }

    /// Record that a health check has just completed.
    pub fn mark_checked(&self) {
        self.last_checked
            .store(current_timestamp_millis(), Ordering::Release);
    }

    /// When the backend was last checked, if ever.
    pub fn last_checked(&self) -> Option<SystemTime> {
        match self.last_checked.load(Ordering::Acquire) {
            0 => None,
            millis => Some(UNIX_EPOCH + Duration::from_millis(millis)),
        }
    }
}

/// Get the current Unix timestamp in milliseconds.
fn current_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_starts_unhealthy() {
        let backend = Backend::new(BackendAddress::new("localhost", 8081));
        assert!(!backend.is_healthy());
        assert!(backend.last_checked().is_none());
    }

    #[test]
    fn test_set_healthy_returns_previous() {
        let backend = Backend::new(BackendAddress::new("localhost", 8081));
        assert!(!backend.set_healthy(true));
        assert!(backend.set_healthy(true));
        assert!(backend.set_healthy(false));
        assert!(!backend.is_healthy());
    }

    #[test]
    fn test_mark_checked() {
        let backend = Backend::new(BackendAddress::new("localhost", 8081));
        let before = SystemTime::now() - Duration::from_secs(1);
        backend.mark_checked();
        let checked = backend.last_checked().unwrap();
        assert!(checked >= before);
    }

    #[test]
    fn test_address_display() {
        assert_eq!(BackendAddress::new("localhost", 80).to_string(), "localhost:80");
        assert_eq!(BackendAddress::new("::1", 80).to_string(), "[::1]:80");

        let from_socket: BackendAddress = "127.0.0.1:9000".parse::<std::net::SocketAddr>().unwrap().into();
        assert_eq!(from_socket, BackendAddress::new("127.0.0.1", 9000));
    }
}
