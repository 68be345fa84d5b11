//! Client-facing listener and per-connection dispatch.

mod listener;

pub use listener::{DispatchError, FrontendListener};
