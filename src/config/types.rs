//! Configuration data types.

use crate::backend::BackendAddress;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Global settings
    #[serde(default)]
    pub global: GlobalConfig,

    /// Listener and algorithm settings
    #[serde(default)]
    pub load_balancer: LoadBalancerConfig,

    /// Upstream servers, in round-robin order
    #[serde(default = "default_backends")]
    pub backends: Vec<BackendConfig>,

    /// Active health check settings
    #[serde(default)]
    pub health_check: HealthCheckConfig,

    /// Backend connection pool settings
    #[serde(default)]
    pub pool: PoolConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            global: GlobalConfig::default(),
            load_balancer: LoadBalancerConfig::default(),
            backends: default_backends(),
            health_check: HealthCheckConfig::default(),
            pool: PoolConfig::default(),
        }
    }
}

/// Global configuration settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Json,
            metrics: MetricsConfig::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Metrics endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Whether metrics endpoint is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Address to bind metrics server
    #[serde(default = "default_metrics_address")]
    pub address: SocketAddr,

    /// Path for metrics endpoint
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: default_metrics_address(),
            path: default_metrics_path(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoadBalancerConfig {
    /// Address and port to accept client connections on
    #[serde(default = "default_listen_address")]
    pub listen_address: SocketAddr,

    /// Backend selection algorithm
    #[serde(default)]
    pub algorithm: Algorithm,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            algorithm: Algorithm::default(),
        }
    }
}

/// Load balancing algorithm.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    #[default]
    RoundRobin,
    LeastConnections,
}

/// Individual backend server configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct BackendConfig {
    /// Host name or IP address
    pub address: String,

    /// TCP port
    pub port: u16,
}

impl BackendConfig {
    /// The identity this entry registers under.
    pub fn backend_address(&self) -> BackendAddress {
        BackendAddress::new(self.address.clone(), self.port)
    }
}

/// Active health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthCheckConfig {
    /// How often to probe backends
    #[serde(default = "default_health_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Connect timeout for a single probe; must be below `interval`
    #[serde(default = "default_health_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: default_health_interval(),
            timeout: default_health_timeout(),
        }
    }
}

/// Backend connection pool configuration, applied to every backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Maximum live connections per backend (idle plus checked out)
    #[serde(default = "default_pool_max_size")]
    pub max_size: usize,

    /// Maximum idle connections retained per backend, capped at `max_size`
    #[serde(default = "default_pool_max_size")]
    pub max_idle: usize,

    /// Timeout for dialing a new backend connection
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Read deadline of the liveness probe run on idle connections
    #[serde(default = "default_probe_timeout", with = "humantime_serde")]
    pub probe_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: default_pool_max_size(),
            max_idle: default_pool_max_size(),
            connect_timeout: default_connect_timeout(),
            probe_timeout: default_probe_timeout(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

fn default_true() -> bool {
    true
}

fn default_metrics_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_listen_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_backends() -> Vec<BackendConfig> {
    vec![
        BackendConfig {
            address: "localhost".to_string(),
            port: 8081,
        },
        BackendConfig {
            address: "localhost".to_string(),
            port: 8082,
        },
    ]
}

fn default_health_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_health_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_pool_max_size() -> usize {
    64
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_probe_timeout() -> Duration {
    Duration::from_millis(1)
}

/// Custom serde module for humantime durations.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
