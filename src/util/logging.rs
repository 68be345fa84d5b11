//! Logging initialization and configuration.

use crate::config::LogFormat;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Build the filter used by [`init_logging`].
///
/// `RUST_LOG` wins over `level` when it is set and parses.
fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize the logging system.
///
/// # Arguments
///
/// * `level` - Log level filter (e.g., "info", "debug")
/// * `format` - Log output format (json or pretty)
///
/// Only the first call in a process installs a subscriber; later calls are
/// ignored.
pub fn init_logging(level: &str, format: LogFormat) {
    let registry = tracing_subscriber::registry().with(build_filter(level));

    let _ = match format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        init_logging("warn", LogFormat::Pretty);
        init_logging("debug", LogFormat::Json);
    }

    #[test]
    fn test_filter_accepts_directives() {
        let filter = build_filter("tcplb=debug,info");
        assert!(!filter.to_string().is_empty());
    }
}
