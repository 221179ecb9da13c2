//! Error types for the fleet state store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid health check: {0}")]
    Invalid(#[from] ConfigError),
}

/// A health-check setting outside its accepted range. Rejected, never clamped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("interval must be between {min} and {max} minutes, got {value}")]
    Interval { value: u32, min: u32, max: u32 },

    #[error("notification cooldown must be between {min} and {max} minutes, got {value}")]
    Cooldown { value: u32, min: u32, max: u32 },

    #[error("notification channel {0} does not exist")]
    UnknownChannel(u64),
}
