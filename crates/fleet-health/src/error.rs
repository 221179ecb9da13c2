//! Health monitor error types.

use thiserror::Error;

use fleet_state::{ConfigError, ServerId, StateError};

/// Errors returned by [`HealthMonitor`](crate::HealthMonitor) operations.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("invalid health check: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("health check for server {config} given with server record {server}")]
    ServerMismatch { server: ServerId, config: ServerId },

    #[error("config source error: {0}")]
    Source(#[from] StateError),
}

pub type MonitorResult<T> = Result<T, MonitorError>;
