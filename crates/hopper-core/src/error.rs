//! Error types for the queue core.

use thiserror::Error;

use crate::domain::{Fingerprint, MessageKind};

/// Invalid configuration. Always fatal at construction time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field} '{value}': must match ^\\w+$")]
    InvalidName { field: &'static str, value: String },

    #[error("lock_ttl_seconds must be positive, got {0}")]
    NonPositiveLockTtl(i64),

    #[error("ack_timeout_ms must be positive")]
    ZeroAckTimeout,

    #[error("{field} must not exceed {max:?}")]
    TimeoutTooLarge {
        field: &'static str,
        max: std::time::Duration,
    },

    #[error("schema_version must be positive")]
    ZeroSchemaVersion,

    #[error("retries.{0}.max_attempts must be at least 1")]
    ZeroRetryAttempts(&'static str),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a store operation.
///
/// Only `Transient` is retried by the queue. Everything else is surfaced as-is.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Lock contention, busy database, lost connection.
    #[error("transient store failure: {0}")]
    Transient(String),

    #[error("store failure: {0}")]
    Backend(String),

    #[error("invalid namespace: {0}")]
    Namespace(#[from] ConfigError),

    /// A stored record could not be decoded.
    #[error("corrupt record for {fingerprint}: {reason}")]
    Corrupt {
        fingerprint: Fingerprint,
        reason: String,
    },
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
                StoreError::Transient(err.to_string())
            }
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::Backend(format!("store task failed: {err}"))
    }
}

/// Error returned by `Queue` operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to encode message: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Failure of a message handler. The message stays unacknowledged.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("cannot decode {kind} payload: {source}")]
    Decode {
        kind: MessageKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("handler failed: {0}")]
    Failed(String),

    #[error("no handler registered for {0}")]
    NotFound(MessageKind),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(StoreError::Transient("busy".into()).is_retryable());
        assert!(!StoreError::Backend("disk full".into()).is_retryable());
    }

    #[test]
    fn sqlite_busy_maps_to_transient() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(StoreError::from(err).is_retryable());

        let err = rusqlite::Error::QueryReturnedNoRows;
        assert!(!StoreError::from(err).is_retryable());
    }
}
