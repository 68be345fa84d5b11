//! Registry of configured backend servers.

use crate::backend::{Backend, BackendAddress};
use crate::config::BackendConfig;
use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Registry errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("backend {0} is already registered")]
    Duplicate(BackendAddress),
}

/// Ordered, append-only set of backends.
///
/// Insertion order is the index space used by round-robin selection and
/// the tie-break order of least-connections, so entries are never removed
/// or reordered. The lock only guards membership; health flags live in
/// each [`Backend`] and are read without it.
#[derive(Debug, Default)]
pub struct BackendRegistry {
    backends: RwLock<Vec<Arc<Backend>>>,
}

impl BackendRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configuration, preserving order.
    pub fn from_config(backends: &[BackendConfig]) -> Result<Self, RegistryError> {
        let registry = Self::new();
        for backend in backends {
            registry.add_backend(backend.backend_address())?;
        }
        Ok(registry)
    }

    /// Append a new backend. It starts unhealthy until its first check passes.
    pub fn add_backend(&self, address: BackendAddress) -> Result<Arc<Backend>, RegistryError> {
        let mut backends = self.backends.write();

        if backends.iter().any(|b| b.address() == &address) {
            return Err(RegistryError::Duplicate(address));
        }

        debug!(backend = %address, "registered backend");
        let backend = Arc::new(Backend::new(address));
        backends.push(Arc::clone(&backend));
        Ok(backend)
    }

    /// Snapshot of every backend in registry order.
    pub fn all_backends(&self) -> Vec<Arc<Backend>> {
        self.backends.read().clone()
    }

    /// Snapshot of the healthy backends in registry order.
    pub fn healthy_backends(&self) -> Vec<Arc<Backend>> {
        self.backends
            .read()
            .iter()
            .filter(|b| b.is_healthy())
            .cloned()
            .collect()
    }

    /// Number of backends currently flagged healthy.
    pub fn healthy_count(&self) -> usize {
        self.backends.read().iter().filter(|b| b.is_healthy()).count()
    }

    /// Look up a backend by identity.
    pub fn get(&self, address: &BackendAddress) -> Option<Arc<Backend>> {
        self.backends
            .read()
            .iter()
            .find(|b| b.address() == address)
            .cloned()
    }

    /// Number of registered backends.
    pub fn len(&self) -> usize {
        self.backends.read().len()
    }

    /// Whether no backends are registered.
    pub fn is_empty(&self) -> bool {
        self.backends.read().is_empty()
    }
}
