//! Backend servers, their registry, and load balancing algorithms.

pub mod algorithms;
mod registry;
mod server;

pub use registry::{BackendRegistry, RegistryError};
pub use server::{Backend, BackendAddress};
