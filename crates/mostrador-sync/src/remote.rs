//! # Remote Store Adapter
//!
//! Applies one sanitized operation to the remote authoritative store and
//! classifies the result.
//!
//! ## Outcome Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Remote Apply Semantics                           │
//! │                                                                         │
//! │  CREATE   id present and row exists  → Success (re-delivery)           │
//! │           otherwise INSERT           → Success | error                 │
//! │                                                                         │
//! │  MODIFY   no id                      → StructuralFailure               │
//! │           row missing                → StructuralFailure (retry later) │
//! │           UPDATE                     → Success | error                 │
//! │                                                                         │
//! │  REMOVE   no id                      → StructuralFailure               │
//! │           DELETE (0 or 1 rows)       → Success                         │
//! │                                                                         │
//! │  errors:  I/O, TLS, pool timeout,    → TransientFailure                │
//! │           SQLSTATE 08xxx / 57P01 /                                     │
//! │           53300, SQLite busy/locked/cantopen (and extended codes)      │
//! │           anything else              → StructuralFailure               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The SQL implementation runs over `sqlx::AnyPool`, so the remote is
//! PostgreSQL in production and a SQLite file in tests.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use mostrador_core::{ColumnKind, OperationKind, Payload, SchemaDescriptor, Value};
use sqlx::any::{AnyArguments, AnyPoolOptions};
use sqlx::query::Query;
use sqlx::{Any, AnyPool};
use tracing::{debug, info};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Outcome
// =============================================================================

/// Result of one remote apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// The remote rejected the shape of the request.
    StructuralFailure(String),
    /// The remote could not be reached or is unavailable.
    TransientFailure(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

// =============================================================================
// RemoteStore Trait
// =============================================================================

/// Something that can apply a sanitized operation to the remote store.
///
/// Implementations must never panic on remote errors; every failure is an
/// [`Outcome`].
pub trait RemoteStore: Send + Sync + 'static {
    fn apply(
        &self,
        target: &str,
        kind: OperationKind,
        payload: &Payload,
    ) -> impl Future<Output = Outcome> + Send;
}

// =============================================================================
// SQL Dialect
// =============================================================================

/// SQL flavour spoken by the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    /// Picks the dialect from the URL scheme.
    pub fn from_url(raw: &str) -> SyncResult<Self> {
        let url = url::Url::parse(raw)?;
        match url.scheme() {
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "sqlite" => Ok(Dialect::Sqlite),
            other => Err(SyncError::InvalidUrl(format!(
                "unsupported scheme '{other}', expected postgres:// or sqlite:"
            ))),
        }
    }

    /// Placeholder for the `n`th bound value of a column of `kind`.
    fn placeholder(&self, n: usize, kind: ColumnKind) -> String {
        match (self, kind) {
            // Timestamps are bound as RFC 3339 text.
            (Dialect::Postgres, ColumnKind::Timestamp) => format!("CAST(${n} AS TIMESTAMP)"),
            _ => format!("${n}"),
        }
    }
}

// =============================================================================
// SQL Remote Store
// =============================================================================

/// [`RemoteStore`] over a SQL database reached through `sqlx::AnyPool`.
#[derive(Debug, Clone)]
pub struct SqlRemoteStore {
    pool: AnyPool,
    dialect: Dialect,
    schema: Arc<SchemaDescriptor>,
}

impl SqlRemoteStore {
    /// Builds the adapter without opening a connection. The first apply
    /// connects; until then the engine runs offline.
    pub fn connect_lazy(
        url: &str,
        schema: Arc<SchemaDescriptor>,
        acquire_timeout: Duration,
    ) -> SyncResult<Self> {
        sqlx::any::install_default_drivers();
        let dialect = Dialect::from_url(url)?;

        let pool = AnyPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(acquire_timeout)
            .connect_lazy(url)
            .map_err(|e| SyncError::InvalidUrl(e.to_string()))?;

        info!(?dialect, "Remote store configured");

        Ok(SqlRemoteStore {
            pool,
            dialect,
            schema,
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    async fn try_apply(
        &self,
        target: &str,
        kind: OperationKind,
        payload: &Payload,
    ) -> Result<Outcome, sqlx::Error> {
        let table = match self.schema.table(target) {
            Some(table) => table,
            None => return Ok(Outcome::StructuralFailure(format!("unknown target table {target}"))),
        };
        let id_column = table.id_column();
        let id = payload.get(id_column).filter(|v| !v.is_null());

        let column_kind = |name: &str| table.get(name).map_or(ColumnKind::Text, |c| c.kind);

        match kind {
            OperationKind::Create => {
                let mut tx = self.pool.begin().await?;

                if let Some(id) = id {
                    let sql = format!("SELECT 1 FROM \"{target}\" WHERE \"{id_column}\" = $1");
                    let existing = bind_value(sqlx::query(&sql), id).fetch_optional(&mut *tx).await?;
                    if existing.is_some() {
                        tx.rollback().await?;
                        debug!(target = %target, "Row already present, create treated as delivered");
                        return Ok(Outcome::Success);
                    }
                }

                let columns: Vec<(&String, &Value)> = payload.iter().collect();
                let names: Vec<String> = columns.iter().map(|(c, _)| format!("\"{c}\"")).collect();
                let marks: Vec<String> = columns
                    .iter()
                    .enumerate()
                    .map(|(i, (c, _))| self.dialect.placeholder(i + 1, column_kind(c)))
                    .collect();
                let sql = format!(
                    "INSERT INTO \"{target}\" ({}) VALUES ({})",
                    names.join(", "),
                    marks.join(", ")
                );

                let mut query = sqlx::query(&sql);
                for (_, value) in &columns {
                    query = bind_value(query, value);
                }
                query.execute(&mut *tx).await?;
                tx.commit().await?;

                Ok(Outcome::Success)
            }

            OperationKind::Modify => {
                let Some(id) = id else {
                    return Ok(Outcome::StructuralFailure(format!(
                        "{target} modify without {id_column}"
                    )));
                };

                let sql = format!("SELECT 1 FROM \"{target}\" WHERE \"{id_column}\" = $1");
                let existing = bind_value(sqlx::query(&sql), id).fetch_optional(&self.pool).await?;
                if existing.is_none() {
                    return Ok(Outcome::StructuralFailure(format!(
                        "{target} row {id} not found on remote"
                    )));
                }

                let columns: Vec<(&String, &Value)> =
                    payload.iter().filter(|(c, _)| c.as_str() != id_column).collect();
                if columns.is_empty() {
                    return Ok(Outcome::Success);
                }

                let sets: Vec<String> = columns
                    .iter()
                    .enumerate()
                    .map(|(i, (c, _))| format!("\"{c}\" = {}", self.dialect.placeholder(i + 1, column_kind(c))))
                    .collect();
                let sql = format!(
                    "UPDATE \"{target}\" SET {} WHERE \"{id_column}\" = ${}",
                    sets.join(", "),
                    columns.len() + 1
                );

                let mut query = sqlx::query(&sql);
                for (_, value) in &columns {
                    query = bind_value(query, value);
                }
                bind_value(query, id).execute(&self.pool).await?;

                Ok(Outcome::Success)
            }

            OperationKind::Remove => {
                let Some(id) = id else {
                    return Ok(Outcome::StructuralFailure(format!(
                        "{target} remove without {id_column}"
                    )));
                };

                let sql = format!("DELETE FROM \"{target}\" WHERE \"{id_column}\" = $1");
                let result = bind_value(sqlx::query(&sql), id).execute(&self.pool).await?;
                if result.rows_affected() == 0 {
                    debug!(target = %target, "Row already absent, remove treated as delivered");
                }

                Ok(Outcome::Success)
            }
        }
    }
}

impl RemoteStore for SqlRemoteStore {
    async fn apply(&self, target: &str, kind: OperationKind, payload: &Payload) -> Outcome {
        match self.try_apply(target, kind, payload).await {
            Ok(outcome) => outcome,
            Err(err) => classify(err),
        }
    }
}

/// Sorts a driver error into transient or structural.
pub fn classify(err: sqlx::Error) -> Outcome {
    let transient = match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db.code().is_some_and(|code| is_transient_code(&code)),
        _ => false,
    };

    if transient {
        Outcome::TransientFailure(err.to_string())
    } else {
        Outcome::StructuralFailure(err.to_string())
    }
}

fn is_transient_code(code: &str) -> bool {
    // SQLSTATE is always five characters: 08xxx connection exceptions, admin
    // shutdown, cannot connect now, too many connections.
    if code.len() == 5 {
        return code.starts_with("08") || matches!(code, "57P01" | "57P03" | "53300");
    }

    // SQLite result codes, extended ones included: the low byte is the
    // primary code. BUSY (5), LOCKED (6), CANTOPEN (14).
    code.parse::<u32>()
        .is_ok_and(|n| matches!(n % 256, 5 | 6 | 14))
}

fn bind_value<'q>(query: Query<'q, Any, AnyArguments<'q>>, value: &Value) -> Query<'q, Any, AnyArguments<'q>> {
    match value {
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Decimal(d) => query.bind(*d),
        Value::Text(s) => query.bind(s.clone()),
        Value::Timestamp(ts) => query.bind(ts.to_rfc3339()),
        Value::Null => query.bind(Option::<String>::None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_from_url() {
        assert_eq!(Dialect::from_url("postgres://pos@db/mostrador").unwrap(), Dialect::Postgres);
        assert_eq!(Dialect::from_url("postgresql://db/mostrador").unwrap(), Dialect::Postgres);
        assert_eq!(Dialect::from_url("sqlite:///tmp/remote.db").unwrap(), Dialect::Sqlite);
        assert!(matches!(Dialect::from_url("mysql://db/x"), Err(SyncError::InvalidUrl(_))));
        assert!(Dialect::from_url("not a url").is_err());
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(Dialect::Postgres.placeholder(2, ColumnKind::Timestamp), "CAST($2 AS TIMESTAMP)");
        assert_eq!(Dialect::Postgres.placeholder(1, ColumnKind::Integer), "$1");
        assert_eq!(Dialect::Sqlite.placeholder(3, ColumnKind::Timestamp), "$3");
    }

    #[test]
    fn test_classify_pool_errors_as_transient() {
        assert!(matches!(classify(sqlx::Error::PoolTimedOut), Outcome::TransientFailure(_)));
        assert!(matches!(classify(sqlx::Error::PoolClosed), Outcome::TransientFailure(_)));
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(classify(sqlx::Error::Io(io)), Outcome::TransientFailure(_)));
        assert!(matches!(classify(sqlx::Error::RowNotFound), Outcome::StructuralFailure(_)));
    }

    #[test]
    fn test_transient_codes() {
        assert!(is_transient_code("08006"));
        assert!(is_transient_code("57P01"));
        assert!(is_transient_code("53300"));
        assert!(is_transient_code("5"));
        assert!(is_transient_code("14"));
        // SQLITE_BUSY_SNAPSHOT, SQLITE_LOCKED_SHAREDCACHE, SQLITE_BUSY_TIMEOUT
        assert!(is_transient_code("517"));
        assert!(is_transient_code("262"));
        assert!(is_transient_code("773"));
        assert!(!is_transient_code("23505"));
        // SQLITE_CONSTRAINT_FOREIGNKEY, SQLITE_CONSTRAINT_UNIQUE
        assert!(!is_transient_code("787"));
        assert!(!is_transient_code("2067"));
        assert!(!is_transient_code("22P02"));
    }
}
