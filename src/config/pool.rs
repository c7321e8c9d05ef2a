//! Connection pool configuration
//!
//! Defines sizing and lifecycle limits for the connection pool.

use super::duration::serde_str;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Default maximum connections: the CPU count, but never fewer than 4
fn default_max_connections() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(4)
}

/// Default minimum connections
fn default_min_connections() -> usize {
    0
}

/// Default maximum connection lifetime (1 hour)
fn default_max_connection_lifetime() -> Duration {
    Duration::from_secs(60 * 60)
}

/// Default maximum idle time (30 minutes)
fn default_max_connection_idle_time() -> Duration {
    Duration::from_secs(30 * 60)
}

/// Default health check period (1 minute)
fn default_health_check_period() -> Duration {
    Duration::from_secs(60)
}

/// Default timeout for connections created by the health check
fn default_background_connect_timeout() -> Duration {
    Duration::from_secs(60)
}

/// Connection pool configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of open connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Number of connections the health check keeps open
    #[serde(default = "default_min_connections")]
    pub min_connections: usize,

    /// Connections older than this are closed instead of reused
    #[serde(default = "default_max_connection_lifetime", with = "serde_str")]
    pub max_connection_lifetime: Duration,

    /// Idle connections older than this are closed by the health check
    #[serde(default = "default_max_connection_idle_time", with = "serde_str")]
    pub max_connection_idle_time: Duration,

    /// Interval between health checks
    #[serde(default = "default_health_check_period", with = "serde_str")]
    pub health_check_period: Duration,

    /// Timeout for each connection opened by the health check
    #[serde(default = "default_background_connect_timeout", with = "serde_str")]
    pub background_connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            max_connection_lifetime: default_max_connection_lifetime(),
            max_connection_idle_time: default_max_connection_idle_time(),
            health_check_period: default_health_check_period(),
            background_connect_timeout: default_background_connect_timeout(),
        }
    }
}

impl PoolConfig {
    /// Validate the pool configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::OutOfRange {
                key: super::POOL_MAX_CONNS.to_string(),
                value: 0,
                min: 1,
            });
        }
        if self.max_connections > Semaphore::MAX_PERMITS {
            return Err(ConfigError::TooLarge {
                key: super::POOL_MAX_CONNS.to_string(),
                value: self.max_connections,
                max: Semaphore::MAX_PERMITS,
            });
        }
        if self.min_connections > self.max_connections {
            return Err(ConfigError::MinExceedsMax {
                min: self.min_connections,
                max: self.max_connections,
            });
        }
        if self.health_check_period.is_zero() {
            return Err(ConfigError::ZeroDuration {
                key: super::POOL_HEALTH_CHECK_PERIOD.to_string(),
            });
        }
        if self.background_connect_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration {
                key: "background_connect_timeout".to_string(),
            });
        }
        Ok(())
    }
}
