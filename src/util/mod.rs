//! Utility functions and helpers.

mod logging;
mod connection_id;
mod shutdown;

pub use logging::init_logging;
pub use connection_id::ConnectionId;
pub use shutdown::{ShutdownReceiver, ShutdownSignal};
