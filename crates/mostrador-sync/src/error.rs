//! # Sync Error Types
//!
//! Error types for sync operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │     Remote      │  │     Local store         │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Unavailable    │  │  Database (DbError)     │ │
//! │  │  InvalidUrl     │  │  Timeout        │  │  Schema (CoreError)     │ │
//! │  │  ConfigLoad/Save│  │                 │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  Engine: Offline, NotStarted, ShuttingDown, ChannelError         │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Per-operation remote failures are not errors here: they are
//! [`Outcome`](crate::remote::Outcome) values recorded on the queue.

use mostrador_core::CoreError;
use mostrador_db::DbError;
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Remote URL is malformed or uses an unsupported scheme.
    #[error("Invalid remote URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Local Store Errors
    // =========================================================================
    /// Local store failure. From `enqueue` this means nothing was queued.
    #[error("Local store error: {0}")]
    Database(#[from] DbError),

    /// Schema descriptor or ranking problem.
    #[error("Schema error: {0}")]
    Schema(#[from] CoreError),

    // =========================================================================
    // Remote Errors
    // =========================================================================
    /// Remote store could not be reached.
    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),

    /// Remote call exceeded its time bound.
    #[error("Remote call timed out after {0} seconds")]
    Timeout(u64),

    // =========================================================================
    // Engine Errors
    // =========================================================================
    /// Sync is disabled by configuration.
    #[error("Sync is disabled (mode: offline)")]
    Offline,

    /// The engine has not been started.
    #[error("Sync engine is not running")]
    NotStarted,

    /// Engine is shutting down.
    #[error("Sync engine is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// Internal sync error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if trying again later may succeed without any change.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::RemoteUnavailable(_)
                | SyncError::Timeout(_)
                | SyncError::Database(DbError::PoolExhausted)
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::RemoteUnavailable("connection refused".into()).is_retryable());
        assert!(SyncError::Timeout(5).is_retryable());
        assert!(SyncError::Database(DbError::PoolExhausted).is_retryable());

        assert!(!SyncError::InvalidConfig("bad".into()).is_retryable());
        assert!(!SyncError::Offline.is_retryable());
        assert!(!SyncError::Database(DbError::not_found("Operation", 1)).is_retryable());
    }

    #[test]
    fn test_config_errors() {
        assert!(SyncError::InvalidUrl("ftp://x".into()).is_config_error());
        assert!(!SyncError::Timeout(5).is_config_error());
    }

    #[test]
    fn test_enqueue_failure_keeps_db_error() {
        let err: SyncError = DbError::QueryFailed("disk I/O error".into()).into();
        assert!(matches!(err, SyncError::Database(DbError::QueryFailed(_))));
        assert!(err.to_string().contains("disk I/O error"));
    }
}
