//! # Local Mutation Repository
//!
//! Writes a business row to the local store and appends the matching queue
//! entry in the same transaction. If either statement fails, neither is
//! kept.
//!
//! Only columns declared in the [`SchemaDescriptor`] are written locally.
//! The queue receives the payload as the caller gave it (metadata fields
//! included), plus the assigned `id` for creates; cleaning happens at
//! delivery time.

use std::sync::Arc;

use mostrador_core::sanitizer::coerce;
use mostrador_core::{ensure_finite, ColumnKind, OperationId, OperationKind, Payload, SchemaDescriptor, TableSchema, Value};
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::{Sqlite, SqlitePool};
use tracing::{debug, instrument};

use super::queue::SyncQueueRepository;
use crate::error::{DbError, DbResult};

/// Result of a committed local mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalMutation {
    /// Local row id the mutation applied to.
    pub row_id: i64,
    /// Queue entry carrying the mutation to the remote store.
    pub operation_id: OperationId,
}

/// Repository for business writes that must also reach the remote store.
#[derive(Debug, Clone)]
pub struct LocalMutationRepository {
    pool: SqlitePool,
    schema: Arc<SchemaDescriptor>,
}

impl LocalMutationRepository {
    /// Creates a new LocalMutationRepository.
    pub fn new(pool: SqlitePool, schema: Arc<SchemaDescriptor>) -> Self {
        LocalMutationRepository { pool, schema }
    }

    /// Applies `kind` to `target` locally and enqueues it, atomically.
    ///
    /// ## Errors
    /// * `DbError::Schema` - unknown target table, or a NaN/infinite decimal
    /// * `DbError::MissingIdentifier` - modify/remove without an `id`
    /// * `DbError::NotFound` - modify/remove of a row that does not exist
    /// * constraint violations from the local schema
    ///
    /// On any error nothing is written and nothing is queued.
    #[instrument(skip_all, fields(target = %target, kind = %kind))]
    pub async fn apply(
        &self,
        target: &str,
        kind: OperationKind,
        payload: &Payload,
    ) -> DbResult<LocalMutation> {
        let table = self.schema.require(target)?;
        ensure_finite(payload)?;
        let id_column = table.id_column();
        let row_id = payload
            .get(id_column)
            .and_then(|v| coerce(ColumnKind::Integer, v))
            .and_then(|v| match v {
                Value::Int(i) => Some(i),
                _ => None,
            });

        if kind != OperationKind::Create && row_id.is_none() {
            return Err(DbError::MissingIdentifier {
                target: target.to_string(),
                kind: kind.to_string(),
            });
        }

        // Take the write lock up front; a read-then-write upgrade in WAL mode
        // fails with BUSY instead of waiting out busy_timeout.
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        let mut queued = payload.clone();

        let row_id = match kind {
            OperationKind::Create => {
                let columns = writable_columns(table, payload, true);
                let sql = if columns.is_empty() {
                    format!("INSERT INTO \"{target}\" DEFAULT VALUES")
                } else {
                    let names: Vec<String> = columns.iter().map(|(c, _)| format!("\"{c}\"")).collect();
                    let marks: Vec<&str> = columns.iter().map(|_| "?").collect();
                    format!(
                        "INSERT INTO \"{target}\" ({}) VALUES ({})",
                        names.join(", "),
                        marks.join(", ")
                    )
                };

                let mut query = sqlx::query(&sql);
                for (_, value) in &columns {
                    query = bind_value(query, value);
                }
                let result = query.execute(&mut *tx).await?;

                let id = row_id.unwrap_or_else(|| result.last_insert_rowid());
                queued.insert(id_column.to_string(), Value::Int(id));
                id
            }

            OperationKind::Modify => {
                let id = row_id.unwrap_or_default();
                let columns = writable_columns(table, payload, false);
                if columns.is_empty() {
                    ensure_exists(&mut tx, table, id).await?;
                } else {
                    let sets: Vec<String> = columns.iter().map(|(c, _)| format!("\"{c}\" = ?")).collect();
                    let sql = format!(
                        "UPDATE \"{target}\" SET {} WHERE \"{id_column}\" = ?",
                        sets.join(", ")
                    );

                    let mut query = sqlx::query(&sql);
                    for (_, value) in &columns {
                        query = bind_value(query, value);
                    }
                    let result = query.bind(id).execute(&mut *tx).await?;
                    if result.rows_affected() == 0 {
                        return Err(DbError::not_found(target, id));
                    }
                }
                id
            }

            OperationKind::Remove => {
                let id = row_id.unwrap_or_default();
                let sql = format!("DELETE FROM \"{target}\" WHERE \"{id_column}\" = ?");
                let result = sqlx::query(&sql).bind(id).execute(&mut *tx).await?;
                if result.rows_affected() == 0 {
                    return Err(DbError::not_found(target, id));
                }
                id
            }
        };

        let operation_id = SyncQueueRepository::enqueue_in(&mut tx, target, kind, &queued).await?;

        tx.commit().await?;

        debug!(row_id, op_id = operation_id, "Local mutation committed and queued");

        Ok(LocalMutation {
            row_id,
            operation_id,
        })
    }
}

/// Declared columns present in the payload, coerced to their kind. Values
/// that cannot be coerced are written as given and left to the column's
/// own constraints.
fn writable_columns<'p>(table: &TableSchema, payload: &'p Payload, with_id: bool) -> Vec<(&'p str, Value)> {
    payload
        .iter()
        .filter(|(name, _)| with_id || name.as_str() != table.id_column())
        .filter_map(|(name, value)| {
            let column = table.get(name)?;
            let value = match value {
                Value::Null => Value::Null,
                other => coerce(column.kind, other).unwrap_or_else(|| other.clone()),
            };
            Some((name.as_str(), value))
        })
        .collect()
}

async fn ensure_exists(
    tx: &mut sqlx::Transaction<'static, Sqlite>,
    table: &TableSchema,
    id: i64,
) -> DbResult<()> {
    let sql = format!(
        "SELECT 1 FROM \"{}\" WHERE \"{}\" = ?",
        table.name(),
        table.id_column()
    );
    let found: Option<i64> = sqlx::query_scalar(&sql).bind(id).fetch_optional(&mut **tx).await?;
    found.map(|_| ()).ok_or_else(|| DbError::not_found(table.name(), id))
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Decimal(d) => query.bind(*d),
        Value::Text(s) => query.bind(s.clone()),
        Value::Timestamp(ts) => query.bind(*ts),
        Value::Null => query.bind(Option::<String>::None),
    }
}
