//! Configuration validation.

use crate::config::Config;
use std::collections::HashSet;
use std::time::Duration;

/// Validate the configuration.
///
/// Checks for:
/// - At least one backend
/// - Unique backend identities and non-zero ports
/// - A health check timeout strictly below the interval
/// - Sane pool bounds
///
/// # Returns
///
/// `Ok(())` if valid, or an error message describing every problem found.
pub fn validate_config(config: &Config) -> Result<(), String> {
    let mut errors = Vec::new();

    if config.backends.is_empty() {
        errors.push("at least one backend must be defined".to_string());
    }

    let mut identities = HashSet::new();
    for backend in &config.backends {
        if backend.address.is_empty() {
            errors.push("backend address cannot be empty".to_string());
        }

        if backend.port == 0 {
            errors.push(format!("backend '{}' has port 0", backend.address));
        }

        if !identities.insert(backend.backend_address()) {
            errors.push(format!(
                "duplicate backend: {}",
                backend.backend_address()
            ));
        }
    }

    let health = &config.health_check;
    if health.interval == Duration::ZERO {
        errors.push("health check interval must be greater than zero".to_string());
    }
    if health.timeout == Duration::ZERO {
        errors.push("health check timeout must be greater than zero".to_string());
    }
    if health.timeout >= health.interval {
        errors.push(format!(
            "health check timeout ({}) must be shorter than the interval ({})",
            humantime::format_duration(health.timeout),
            humantime::format_duration(health.interval)
        ));
    }

    let pool = &config.pool;
    if pool.max_size == 0 {
        errors.push("pool max_size must be at least 1".to_string());
    }
    if pool.connect_timeout == Duration::ZERO {
        errors.push("pool connect_timeout must be greater than zero".to_string());
    }
    if pool.probe_timeout == Duration::ZERO {
        errors.push("pool probe_timeout must be greater than zero".to_string());
    }

    // Validate log level
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.global.log_level.to_lowercase().as_str()) {
        errors.push(format!(
            "invalid log level '{}', must be one of: {}",
            config.global.log_level,
            valid_levels.join(", ")
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;

    fn minimal_config() -> Config {
        Config {
            backends: vec![BackendConfig {
                address: "127.0.0.1".to_string(),
                port: 9000,
            }],
            ..Config::default()
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&minimal_config()).is_ok());
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_no_backends() {
        let mut config = minimal_config();
        config.backends.clear();
        let result = validate_config(&config);
        assert!(result.unwrap_err().contains("at least one backend"));
    }

    #[test]
    fn test_duplicate_backend() {
        let mut config = minimal_config();
        config.backends.push(config.backends[0].clone());
        let result = validate_config(&config);
        assert!(result.unwrap_err().contains("duplicate backend: 127.0.0.1:9000"));
    }

    #[test]
    fn test_same_host_different_port_is_distinct() {
        let mut config = minimal_config();
        config.backends.push(BackendConfig {
            address: "127.0.0.1".to_string(),
            port: 9001,
        });
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_timeout_must_be_below_interval() {
        let mut config = minimal_config();
        config.health_check.interval = Duration::from_secs(1);
        config.health_check.timeout = Duration::from_secs(1);
        let result = validate_config(&config);
        assert!(result.unwrap_err().contains("must be shorter than the interval"));
    }

    #[test]
    fn test_pool_bounds() {
        let mut config = minimal_config();
        config.pool.max_size = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.contains("max_size must be at least 1"));

        // Idle capacity above max_size is capped by the pool, not rejected
        let mut config = minimal_config();
        config.pool.max_size = 2;
        config.pool.max_idle = 3;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = minimal_config();
        config.global.log_level = "verbose".to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(err.contains("invalid log level 'verbose'"));
    }

    #[test]
    fn test_errors_are_collected() {
        let mut config = minimal_config();
        config.backends[0].port = 0;
        config.pool.max_size = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.contains("port 0"));
        assert!(err.contains("max_size"));
    }
}
