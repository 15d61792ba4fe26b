//! # Error Types
//!
//! Domain error types for mostrador-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  mostrador-core errors (this file)                                     │
//! │  └── CoreError        - Schema / identifier / decoding problems        │
//! │                                                                         │
//! │  mostrador-db errors                                                   │
//! │  └── DbError          - Local store failures (FatalQueueFailure)       │
//! │                                                                         │
//! │  mostrador-sync errors                                                 │
//! │  └── SyncError        - Config, remote, dispatcher lifecycle           │
//! │                                                                         │
//! │  Flow: CoreError → DbError → SyncError → operator                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Per-operation outcomes (skips, structural and transient failures) are not
//! errors; they are recorded on the operation itself.

use thiserror::Error;

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A table or column name is not a plain SQL identifier.
    ///
    /// ## When This Occurs
    /// - Schema declared with a name containing spaces or quotes
    /// - Target name coming from an untrusted caller
    #[error("Invalid identifier: '{0}'")]
    InvalidIdentifier(String),

    /// Target table is not declared in the schema descriptor.
    #[error("Unknown target table: {0}")]
    UnknownTarget(String),

    /// Table declared twice in the same descriptor.
    #[error("Table declared twice: {0}")]
    DuplicateTable(String),

    /// Column declared twice in the same table.
    #[error("Column {column} declared twice in {table}")]
    DuplicateColumn { table: String, column: String },

    /// A column references a table that ranks at or after its own table.
    ///
    /// ## When This Occurs
    /// - The declared ranking lists a child before its parent
    /// - The schema introduces a reference cycle
    #[error("{table} references {referenced}, but {referenced} does not rank before it")]
    RankingViolation { table: String, referenced: String },

    /// Unknown operation kind or status text read back from storage.
    #[error("Unknown {field} value: '{value}'")]
    UnknownVariant { field: &'static str, value: String },

    /// Stored payload could not be decoded.
    #[error("Payload decode failed: {0}")]
    PayloadDecode(String),

    /// A decimal field holds NaN or an infinity, which the stored JSON form
    /// cannot represent.
    #[error("Field {field} holds a non-finite decimal")]
    NonFiniteDecimal { field: String },
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::PayloadDecode(err.to_string())
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::RankingViolation {
            table: "productos".to_string(),
            referenced: "categorias".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "productos references categorias, but categorias does not rank before it"
        );

        let err = CoreError::UnknownVariant {
            field: "kind",
            value: "upsert".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown kind value: 'upsert'");
    }

    #[test]
    fn test_json_error_converts() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: CoreError = json_err.into();
        assert!(matches!(err, CoreError::PayloadDecode(_)));
    }
}
