//! # Operations
//!
//! An `Operation` is one queued mutation on its way to the remote store.
//!
//! ## Status Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │            enqueue                                                      │
//! │               │                                                         │
//! │               ▼                                                         │
//! │         ┌──────────┐   next_batch    ┌───────────┐                      │
//! │         │ Pending  │ ──────────────► │ InFlight  │                      │
//! │         └──────────┘                 └─────┬─────┘                      │
//! │               ▲                            │                            │
//! │               │ retry (attempts + 1,       ├──► Completed  (terminal)   │
//! │               │        below ceiling)      ├──► Skipped    (terminal)   │
//! │               └────────────────────────────┼──► Failed     (terminal)   │
//! │                                            │                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::value::Payload;

/// Locally unique, monotonically assigned operation identifier.
pub type OperationId = i64;

// =============================================================================
// Operation Kind
// =============================================================================

/// What the operation does to its target row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Modify,
    Remove,
}

impl OperationKind {
    /// All kinds, in sub-rank order.
    pub const ALL: [OperationKind; 3] = [
        OperationKind::Create,
        OperationKind::Modify,
        OperationKind::Remove,
    ];

    /// Stored text form.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Modify => "modify",
            OperationKind::Remove => "remove",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" | "insert" => Ok(OperationKind::Create),
            "modify" | "update" => Ok(OperationKind::Modify),
            "remove" | "delete" => Ok(OperationKind::Remove),
            other => Err(CoreError::UnknownVariant {
                field: "kind",
                value: other.to_string(),
            }),
        }
    }
}

// =============================================================================
// Operation Status
// =============================================================================

/// Where the operation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    #[default]
    Pending,
    InFlight,
    Completed,
    Skipped,
    Failed,
}

impl OperationStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [OperationStatus; 5] = [
        OperationStatus::Pending,
        OperationStatus::InFlight,
        OperationStatus::Completed,
        OperationStatus::Skipped,
        OperationStatus::Failed,
    ];

    /// Stored text form.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::InFlight => "in_flight",
            OperationStatus::Completed => "completed",
            OperationStatus::Skipped => "skipped",
            OperationStatus::Failed => "failed",
        }
    }

    /// Completed, Skipped and Failed never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Skipped | OperationStatus::Failed
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CoreError::UnknownVariant {
                field: "status",
                value: s.to_string(),
            })
    }
}

// =============================================================================
// Operation
// =============================================================================

/// One queued mutation.
///
/// The payload is the raw payload exactly as enqueued. It is cleaned again
/// on every drain, so schema changes apply without rewriting stored rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    /// Logical table name.
    pub target: String,
    pub kind: OperationKind,
    pub payload: Payload,
    /// Stable tiebreaker within a rank.
    pub enqueued_at: DateTime<Utc>,
    pub status: OperationStatus,
    /// Number of delivery attempts charged so far.
    pub attempts: u32,
    /// Last delivery failure. Only set once `attempts > 0`.
    pub last_error: Option<String>,
    /// Why the operation was skipped, for `Skipped` operations.
    pub skip_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Operation {
    /// Returns true once the operation reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing_accepts_sql_verbs() {
        assert_eq!("create".parse::<OperationKind>().unwrap(), OperationKind::Create);
        assert_eq!("INSERT".parse::<OperationKind>().unwrap(), OperationKind::Create);
        assert_eq!("update".parse::<OperationKind>().unwrap(), OperationKind::Modify);
        assert_eq!("delete".parse::<OperationKind>().unwrap(), OperationKind::Remove);
        assert!("upsert".parse::<OperationKind>().is_err());
    }

    #[test]
    fn test_status_text_round_trip() {
        for status in OperationStatus::ALL {
            assert_eq!(status.as_str().parse::<OperationStatus>().unwrap(), status);
        }
        assert!("done".parse::<OperationStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!OperationStatus::Pending.is_terminal());
        assert!(!OperationStatus::InFlight.is_terminal());
        assert!(OperationStatus::Completed.is_terminal());
        assert!(OperationStatus::Skipped.is_terminal());
        assert!(OperationStatus::Failed.is_terminal());
    }
}
