//! Byte-level forwarding between client and backend sockets.

mod tcp_proxy;

pub use tcp_proxy::{SpliceEnd, SpliceResult, splice};
