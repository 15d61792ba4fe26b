//! # Sync Queue Repository
//!
//! The durable, ordered log of mutations waiting to reach the remote store.
//! It is the only owner of operation state: the dispatcher reads batches and
//! reports outcomes through the `mark_*` transitions below.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Outbox Pattern Implementation                        │
//! │                                                                         │
//! │  LOCAL OPERATION (e.g., register a sale)                               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   SINGLE TRANSACTION                            │   │
//! │  │  1. INSERT INTO ventas (...) VALUES (...)                       │   │
//! │  │  2. INSERT INTO sync_queue (target, kind, payload, ...)         │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  COMMIT ← Both succeed or both fail                                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            DISPATCHER (background)                              │   │
//! │  │  next_batch → mark_in_flight → deliver →                        │   │
//! │  │      mark_completed | mark_skipped | mark_retry | mark_failed   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every transition is a single guarded `UPDATE`, so a transition either
//! lands completely or not at all, and a terminal row never moves again.
//! Outcomes are only recorded on InFlight rows; the one exception is a
//! pending row whose payload cannot be decoded, parked by `next_batch`.

use chrono::{DateTime, Utc};
use mostrador_core::schema::ensure_identifier;
use mostrador_core::{
    decode_payload, encode_payload, CoreError, DependencyRanker, Operation, OperationId,
    OperationKind, OperationStatus, Payload,
};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};

const QUEUE_COLUMNS: &str = "id, target, kind, payload, enqueued_at, status, attempts, \
                             last_error, skip_reason, updated_at";

// =============================================================================
// Row Mapping
// =============================================================================

#[derive(Debug, FromRow)]
struct QueueRow {
    id: i64,
    target: String,
    kind: OperationKind,
    payload: String,
    enqueued_at: DateTime<Utc>,
    status: OperationStatus,
    attempts: i64,
    last_error: Option<String>,
    skip_reason: Option<String>,
    updated_at: DateTime<Utc>,
}

impl QueueRow {
    fn decode(self) -> Result<Operation, (OperationId, CoreError)> {
        match decode_payload(&self.payload) {
            Ok(payload) => Ok(self.with_payload(payload)),
            Err(err) => Err((self.id, err)),
        }
    }

    fn with_payload(self, payload: Payload) -> Operation {
        Operation {
            id: self.id,
            target: self.target,
            kind: self.kind,
            payload,
            enqueued_at: self.enqueued_at,
            status: self.status,
            attempts: u32::try_from(self.attempts).unwrap_or(0),
            last_error: self.last_error,
            skip_reason: self.skip_reason,
            updated_at: self.updated_at,
        }
    }
}

// =============================================================================
// Queue Status
// =============================================================================

/// Read-only snapshot of the queue for operators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub pending: i64,
    pub in_flight: i64,
    pub completed: i64,
    pub skipped: i64,
    pub failed: i64,
    /// Enqueue time of the oldest pending operation.
    pub oldest_pending_at: Option<DateTime<Utc>>,
    /// Age of the oldest pending operation, in seconds.
    pub oldest_pending_age_secs: Option<i64>,
}

impl QueueStatus {
    /// Count for one status.
    pub fn count(&self, status: OperationStatus) -> i64 {
        match status {
            OperationStatus::Pending => self.pending,
            OperationStatus::InFlight => self.in_flight,
            OperationStatus::Completed => self.completed,
            OperationStatus::Skipped => self.skipped,
            OperationStatus::Failed => self.failed,
        }
    }

    pub fn total(&self) -> i64 {
        OperationStatus::ALL.iter().map(|s| self.count(*s)).sum()
    }

    /// Percentage of operations that are not parked as failed. 100 when empty.
    pub fn health_score(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 100.0;
        }
        (total - self.failed) as f64 * 100.0 / total as f64
    }

    /// A nonzero failed count means someone has to look at the queue.
    pub fn needs_attention(&self) -> bool {
        self.failed > 0
    }

    fn set(&mut self, status: OperationStatus, count: i64) {
        match status {
            OperationStatus::Pending => self.pending = count,
            OperationStatus::InFlight => self.in_flight = count,
            OperationStatus::Completed => self.completed = count,
            OperationStatus::Skipped => self.skipped = count,
            OperationStatus::Failed => self.failed = count,
        }
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for the durable sync queue.
#[derive(Debug, Clone)]
pub struct SyncQueueRepository {
    pool: SqlitePool,
    max_attempts: u32,
}

impl SyncQueueRepository {
    /// Creates a new SyncQueueRepository.
    pub fn new(pool: SqlitePool, max_attempts: u32) -> Self {
        SyncQueueRepository { pool, max_attempts }
    }

    /// Attempts charged before `mark_retry` parks an operation.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    // =========================================================================
    // Enqueue
    // =========================================================================

    /// Appends an operation and returns its id once it is committed.
    ///
    /// ## Returns
    /// * `Ok(id)` - the row is durable
    /// * `Err(DbError)` - nothing was written; the caller must abort
    pub async fn enqueue(
        &self,
        target: &str,
        kind: OperationKind,
        payload: &Payload,
    ) -> DbResult<OperationId> {
        let mut conn = self.pool.acquire().await?;
        Self::enqueue_in(&mut conn, target, kind, payload).await
    }

    /// Appends an operation on a caller-provided connection, typically the
    /// transaction that also holds the business write.
    ///
    /// ## Example
    /// ```rust,ignore
    /// let mut tx = db.begin().await?;
    /// sqlx::query("UPDATE productos SET stock = ?1 WHERE id = ?2")
    ///     .bind(stock).bind(id).execute(&mut *tx).await?;
    /// SyncQueueRepository::enqueue_in(&mut tx, "productos", OperationKind::Modify, &payload).await?;
    /// tx.commit().await?;
    /// ```
    pub async fn enqueue_in(
        conn: &mut SqliteConnection,
        target: &str,
        kind: OperationKind,
        payload: &Payload,
    ) -> DbResult<OperationId> {
        ensure_identifier(target)?;
        let raw = encode_payload(payload)?;
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO sync_queue (
                target, kind, payload, enqueued_at, status, attempts, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, 'pending', 0, ?4
            )
            "#,
        )
        .bind(target)
        .bind(kind)
        .bind(raw)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        let id = result.last_insert_rowid();

        debug!(op_id = id, target = %target, kind = %kind, "Operation enqueued");

        Ok(id)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Returns up to `limit` pending operations in drain order.
    ///
    /// Order: table rank, kind rank, enqueue time, id. A pending row whose
    /// payload cannot be decoded is parked as failed and left out.
    pub async fn next_batch(
        &self,
        ranker: &DependencyRanker,
        limit: u32,
    ) -> DbResult<Vec<Operation>> {
        let tables: Vec<(&str, u32)> = ranker.ranked_tables().collect();

        let mut sql = format!(
            "SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE status = 'pending' ORDER BY "
        );
        if !tables.is_empty() {
            sql.push_str("CASE target");
            for (_, rank) in &tables {
                sql.push_str(&format!(" WHEN ? THEN {rank}"));
            }
            sql.push_str(&format!(" ELSE {} END, ", ranker.fallback_rank()));
        }
        sql.push_str("CASE kind");
        for kind in OperationKind::ALL {
            sql.push_str(&format!(
                " WHEN '{}' THEN {}",
                kind.as_str(),
                DependencyRanker::kind_rank(kind)
            ));
        }
        sql.push_str(" END, enqueued_at ASC, id ASC LIMIT ?");

        let mut query = sqlx::query_as::<_, QueueRow>(&sql);
        for (table, _) in &tables {
            query = query.bind(*table);
        }
        let rows = query.bind(limit).fetch_all(&self.pool).await?;

        let mut batch = Vec::with_capacity(rows.len());
        for row in rows {
            match row.decode() {
                Ok(op) => batch.push(op),
                Err((id, err)) => {
                    self.park_undecodable(id, &err.to_string()).await?;
                }
            }
        }

        Ok(batch)
    }

    /// Fetches one operation.
    pub async fn get(&self, id: OperationId) -> DbResult<Option<Operation>> {
        let sql = format!("SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE id = ?1");
        let row = sqlx::query_as::<_, QueueRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row.decode().map(Some).map_err(|(_, e)| DbError::Schema(e)),
            None => Ok(None),
        }
    }

    /// Counts per status plus the oldest pending operation's age.
    pub async fn status(&self) -> DbResult<QueueStatus> {
        let counts: Vec<(OperationStatus, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM sync_queue GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut status = QueueStatus::default();
        for (s, count) in counts {
            status.set(s, count);
        }

        let oldest: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT enqueued_at FROM sync_queue
            WHERE status = 'pending'
            ORDER BY enqueued_at ASC, id ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        status.oldest_pending_at = oldest;
        status.oldest_pending_age_secs = oldest.map(|ts| (Utc::now() - ts).num_seconds().max(0));

        Ok(status)
    }

    /// Pending counts per target table.
    pub async fn pending_by_target(&self) -> DbResult<Vec<(String, i64)>> {
        let rows = sqlx::query_as(
            r#"
            SELECT target, COUNT(*) FROM sync_queue
            WHERE status = 'pending'
            GROUP BY target
            ORDER BY target
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Most recently parked failures. Undecodable payloads come back empty.
    pub async fn failed(&self, limit: u32) -> DbResult<Vec<Operation>> {
        let sql = format!(
            "SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE status = 'failed' \
             ORDER BY updated_at DESC, id DESC LIMIT ?1"
        );
        let rows = sqlx::query_as::<_, QueueRow>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let payload = decode_payload(&row.payload).unwrap_or_default();
                row.with_payload(payload)
            })
            .collect())
    }

    /// Counts pending operations.
    pub async fn count_pending(&self) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sync_queue WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Pending → InFlight, right before delivery.
    pub async fn mark_in_flight(&self, id: OperationId) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_queue SET
                status = 'in_flight',
                updated_at = ?2
            WHERE id = ?1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        ensure_applied(result.rows_affected(), id, OperationStatus::InFlight)
    }

    /// Delivered.
    pub async fn mark_completed(&self, id: OperationId) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_queue SET
                status = 'completed',
                updated_at = ?2
            WHERE id = ?1 AND status = 'in_flight'
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        ensure_applied(result.rows_affected(), id, OperationStatus::Completed)
    }

    /// Never sent: nothing to deliver or no identifier.
    pub async fn mark_skipped(&self, id: OperationId, reason: &str) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_queue SET
                status = 'skipped',
                skip_reason = ?2,
                updated_at = ?3
            WHERE id = ?1 AND status = 'in_flight'
            "#,
        )
        .bind(id)
        .bind(reason)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        ensure_applied(result.rows_affected(), id, OperationStatus::Skipped)
    }

    /// Charges an attempt and parks the operation for good.
    pub async fn mark_failed(&self, id: OperationId, reason: &str) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_queue SET
                status = 'failed',
                attempts = attempts + 1,
                last_error = ?2,
                updated_at = ?3
            WHERE id = ?1 AND status = 'in_flight'
            "#,
        )
        .bind(id)
        .bind(reason)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        ensure_applied(result.rows_affected(), id, OperationStatus::Failed)?;
        warn!(op_id = id, reason = %reason, "Operation parked as failed");
        Ok(())
    }

    /// Charges an attempt and returns the operation to Pending, or parks it
    /// as Failed once the attempt count reaches the ceiling.
    ///
    /// ## Returns
    /// The resulting status: `Pending` or `Failed`.
    pub async fn mark_retry(&self, id: OperationId, reason: &str) -> DbResult<OperationStatus> {
        let status: Option<OperationStatus> = sqlx::query_scalar(
            r#"
            UPDATE sync_queue SET
                attempts = attempts + 1,
                last_error = ?2,
                status = CASE WHEN attempts + 1 >= ?3 THEN 'failed' ELSE 'pending' END,
                updated_at = ?4
            WHERE id = ?1 AND status = 'in_flight'
            RETURNING status
            "#,
        )
        .bind(id)
        .bind(reason)
        .bind(self.max_attempts)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        let status = status.ok_or(DbError::InvalidTransition {
            id,
            to: OperationStatus::Pending.as_str(),
        })?;

        if status == OperationStatus::Failed {
            warn!(op_id = id, reason = %reason, "Retry ceiling reached, operation parked as failed");
        } else {
            debug!(op_id = id, reason = %reason, "Operation returned to pending");
        }

        Ok(status)
    }

    /// InFlight → Pending without charging an attempt, for a delivery whose
    /// local bookkeeping failed part way.
    pub async fn release_in_flight(&self, id: OperationId) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_queue SET
                status = 'pending',
                updated_at = ?2
            WHERE id = ?1 AND status = 'in_flight'
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        ensure_applied(result.rows_affected(), id, OperationStatus::Pending)?;
        debug!(op_id = id, "Operation released back to pending");
        Ok(())
    }

    /// Pending → Failed for a row whose payload cannot be read, so it never
    /// reaches delivery.
    async fn park_undecodable(&self, id: OperationId, reason: &str) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_queue SET
                status = 'failed',
                attempts = attempts + 1,
                last_error = ?2,
                updated_at = ?3
            WHERE id = ?1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(reason)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        ensure_applied(result.rows_affected(), id, OperationStatus::Failed)?;
        warn!(op_id = id, reason = %reason, "Parking operation with undecodable payload");
        Ok(())
    }

    /// Returns operations left InFlight by an interrupted run to Pending.
    /// No attempt is charged: the outcome of that delivery is unknown.
    pub async fn recover_in_flight(&self) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE sync_queue SET
                status = 'pending',
                updated_at = ?1
            WHERE status = 'in_flight'
            "#,
        )
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            info!(count = recovered, "Recovered in-flight operations");
        }
        Ok(recovered)
    }
}

fn ensure_applied(rows: u64, id: OperationId, to: OperationStatus) -> DbResult<()> {
    if rows == 0 {
        return Err(DbError::InvalidTransition { id, to: to.as_str() });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use mostrador_core::Value;

    async fn setup() -> (Database, SyncQueueRepository) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let queue = db.queue();
        (db, queue)
    }

    fn payload(fields: &[(&str, Value)]) -> Payload {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn named(nombre: &str) -> Payload {
        payload(&[("nombre", Value::Text(nombre.into()))])
    }

    #[tokio::test]
    async fn test_enqueue_persists_raw_payload() {
        let (_db, queue) = setup().await;
        let raw = payload(&[
            ("id", Value::Int(5)),
            ("original_query", Value::Text("UPDATE ventas SET x = 1".into())),
        ]);

        let first = queue.enqueue("ventas", OperationKind::Modify, &raw).await.unwrap();
        let second = queue.enqueue("ventas", OperationKind::Modify, &raw).await.unwrap();
        assert!(second > first);

        let op = queue.get(first).await.unwrap().unwrap();
        assert_eq!(op.target, "ventas");
        assert_eq!(op.kind, OperationKind::Modify);
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.attempts, 0);
        assert_eq!(op.last_error, None);
        assert_eq!(op.payload, raw);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_bad_target() {
        let (_db, queue) = setup().await;
        let err = queue
            .enqueue("ventas; DROP TABLE x", OperationKind::Create, &named("a"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Schema(CoreError::InvalidIdentifier(_))));
        assert_eq!(queue.count_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_next_batch_orders_by_rank_then_kind_then_time() {
        let (_db, queue) = setup().await;
        let ranker = DependencyRanker::pos_default();

        let detalle = queue.enqueue("detalle_ventas", OperationKind::Create, &named("d")).await.unwrap();
        let unknown = queue.enqueue("clientes", OperationKind::Create, &named("c")).await.unwrap();
        let producto = queue.enqueue("productos", OperationKind::Create, &named("p")).await.unwrap();
        let cat_remove = queue
            .enqueue("categorias", OperationKind::Remove, &payload(&[("id", Value::Int(1))]))
            .await
            .unwrap();
        let cat_modify = queue
            .enqueue("categorias", OperationKind::Modify, &payload(&[("id", Value::Int(1))]))
            .await
            .unwrap();
        let cat_create_a = queue.enqueue("categorias", OperationKind::Create, &named("a")).await.unwrap();
        let cat_create_b = queue.enqueue("categorias", OperationKind::Create, &named("b")).await.unwrap();

        let ids: Vec<_> = queue
            .next_batch(&ranker, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|op| op.id)
            .collect();

        assert_eq!(
            ids,
            vec![cat_create_a, cat_create_b, cat_modify, cat_remove, producto, detalle, unknown]
        );

        let limited = queue.next_batch(&ranker, 2).await.unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].id, cat_create_a);
    }

    #[tokio::test]
    async fn test_next_batch_with_empty_ranking_uses_kind_and_time() {
        let (_db, queue) = setup().await;
        let ranker = DependencyRanker::from_order(Vec::<String>::new());

        let modify = queue
            .enqueue("productos", OperationKind::Modify, &payload(&[("id", Value::Int(1))]))
            .await
            .unwrap();
        let create = queue.enqueue("ventas", OperationKind::Create, &named("v")).await.unwrap();

        let ids: Vec<_> = queue
            .next_batch(&ranker, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|op| op.id)
            .collect();
        assert_eq!(ids, vec![create, modify]);
    }

    #[tokio::test]
    async fn test_terminal_states_do_not_move() {
        let (_db, queue) = setup().await;
        let id = queue.enqueue("categorias", OperationKind::Create, &named("a")).await.unwrap();

        queue.mark_in_flight(id).await.unwrap();
        assert!(matches!(
            queue.mark_in_flight(id).await,
            Err(DbError::InvalidTransition { .. })
        ));

        queue.mark_completed(id).await.unwrap();
        assert!(matches!(
            queue.mark_completed(id).await,
            Err(DbError::InvalidTransition { .. })
        ));
        assert!(queue.mark_retry(id, "late").await.is_err());
        assert!(queue.mark_skipped(id, "late").await.is_err());
        assert!(queue.mark_failed(id, "late").await.is_err());

        let op = queue.get(id).await.unwrap().unwrap();
        assert_eq!(op.status, OperationStatus::Completed);
        assert_eq!(op.attempts, 0);
    }

    #[tokio::test]
    async fn test_outcomes_require_in_flight() {
        let (_db, queue) = setup().await;
        let id = queue.enqueue("categorias", OperationKind::Create, &named("a")).await.unwrap();

        assert!(matches!(
            queue.mark_completed(id).await,
            Err(DbError::InvalidTransition { .. })
        ));
        assert!(matches!(
            queue.mark_skipped(id, "no data fields left after sanitizing").await,
            Err(DbError::InvalidTransition { .. })
        ));
        assert!(matches!(
            queue.mark_failed(id, "constraint").await,
            Err(DbError::InvalidTransition { .. })
        ));
        assert!(matches!(
            queue.mark_retry(id, "constraint").await,
            Err(DbError::InvalidTransition { .. })
        ));
        assert!(matches!(
            queue.release_in_flight(id).await,
            Err(DbError::InvalidTransition { .. })
        ));

        let op = queue.get(id).await.unwrap().unwrap();
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.attempts, 0);
        assert_eq!(op.last_error, None);
    }

    #[tokio::test]
    async fn test_release_returns_in_flight_without_charge() {
        let (_db, queue) = setup().await;
        let id = queue.enqueue("categorias", OperationKind::Create, &named("a")).await.unwrap();

        queue.mark_in_flight(id).await.unwrap();
        queue.release_in_flight(id).await.unwrap();

        let op = queue.get(id).await.unwrap().unwrap();
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.attempts, 0);
        assert_eq!(queue.status().await.unwrap().in_flight, 0);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_non_finite_decimal() {
        let (_db, queue) = setup().await;
        let raw = payload(&[
            ("nombre", Value::Text("cafe".into())),
            ("precio", Value::Decimal(f64::NAN)),
        ]);

        let err = queue.enqueue("productos", OperationKind::Create, &raw).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Schema(CoreError::NonFiniteDecimal { ref field }) if field == "precio"
        ));

        let raw = payload(&[("id", Value::Int(1)), ("precio", Value::Decimal(f64::INFINITY))]);
        assert!(queue.enqueue("productos", OperationKind::Modify, &raw).await.is_err());

        assert_eq!(queue.status().await.unwrap().total(), 0);
        assert!(queue
            .next_batch(&DependencyRanker::pos_default(), 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_retry_ceiling_parks_operation() {
        let (_db, queue) = setup().await;
        let ranker = DependencyRanker::pos_default();
        let id = queue.enqueue("categorias", OperationKind::Create, &named("a")).await.unwrap();

        for expected in [
            OperationStatus::Pending,
            OperationStatus::Pending,
            OperationStatus::Failed,
        ] {
            queue.mark_in_flight(id).await.unwrap();
            assert_eq!(queue.mark_retry(id, "connection refused").await.unwrap(), expected);
        }

        let op = queue.get(id).await.unwrap().unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.attempts, 3);
        assert_eq!(op.last_error.as_deref(), Some("connection refused"));

        assert!(queue.next_batch(&ranker, 10).await.unwrap().is_empty());
        assert!(queue.mark_retry(id, "again").await.is_err());
    }

    #[tokio::test]
    async fn test_skip_keeps_attempts_and_error_empty() {
        let (_db, queue) = setup().await;
        let id = queue
            .enqueue("ventas", OperationKind::Modify, &payload(&[("id", Value::Int(5))]))
            .await
            .unwrap();

        queue.mark_in_flight(id).await.unwrap();
        queue.mark_skipped(id, "no data fields left after sanitizing").await.unwrap();

        let op = queue.get(id).await.unwrap().unwrap();
        assert_eq!(op.status, OperationStatus::Skipped);
        assert_eq!(op.attempts, 0);
        assert_eq!(op.last_error, None);
        assert_eq!(
            op.skip_reason.as_deref(),
            Some("no data fields left after sanitizing")
        );
    }

    #[tokio::test]
    async fn test_recover_in_flight() {
        let (_db, queue) = setup().await;
        let a = queue.enqueue("categorias", OperationKind::Create, &named("a")).await.unwrap();
        let b = queue.enqueue("categorias", OperationKind::Create, &named("b")).await.unwrap();
        queue.mark_in_flight(a).await.unwrap();

        assert_eq!(queue.recover_in_flight().await.unwrap(), 1);

        let ops = queue.next_batch(&DependencyRanker::pos_default(), 10).await.unwrap();
        assert_eq!(ops.iter().map(|o| o.id).collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(ops[0].attempts, 0);
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_parked() {
        let (db, queue) = setup().await;
        let good = queue.enqueue("categorias", OperationKind::Create, &named("a")).await.unwrap();

        let now = Utc::now();
        sqlx::query(
            "INSERT INTO sync_queue (target, kind, payload, enqueued_at, status, attempts, updated_at) \
             VALUES ('categorias', 'create', '{not json', ?1, 'pending', 0, ?1)",
        )
        .bind(now)
        .execute(db.pool())
        .await
        .unwrap();

        let batch = queue.next_batch(&DependencyRanker::pos_default(), 10).await.unwrap();
        assert_eq!(batch.iter().map(|o| o.id).collect::<Vec<_>>(), vec![good]);

        let failed = queue.failed(10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].attempts, 1);
        assert!(failed[0].payload.is_empty());
        assert!(failed[0]
            .last_error
            .as_deref()
            .unwrap()
            .contains("Payload decode failed"));
    }

    #[tokio::test]
    async fn test_status_counts_and_oldest_pending() {
        let (_db, queue) = setup().await;
        let empty = queue.status().await.unwrap();
        assert_eq!(empty.total(), 0);
        assert_eq!(empty.oldest_pending_at, None);
        assert_eq!(empty.health_score(), 100.0);

        let a = queue.enqueue("categorias", OperationKind::Create, &named("a")).await.unwrap();
        let b = queue.enqueue("productos", OperationKind::Create, &named("b")).await.unwrap();
        let c = queue.enqueue("productos", OperationKind::Create, &named("c")).await.unwrap();
        let _d = queue.enqueue("ventas", OperationKind::Create, &named("d")).await.unwrap();

        queue.mark_in_flight(a).await.unwrap();
        queue.mark_completed(a).await.unwrap();
        queue.mark_in_flight(b).await.unwrap();
        queue.mark_skipped(b, "missing row identifier").await.unwrap();
        queue.mark_in_flight(c).await.unwrap();
        queue.mark_failed(c, "constraint").await.unwrap();

        let status = queue.status().await.unwrap();
        assert_eq!(status.pending, 1);
        assert_eq!(status.completed, 1);
        assert_eq!(status.skipped, 1);
        assert_eq!(status.failed, 1);
        assert_eq!(status.in_flight, 0);
        assert_eq!(status.total(), 4);
        assert_eq!(status.health_score(), 75.0);
        assert!(status.needs_attention());
        assert!(status.oldest_pending_at.is_some());
        assert!(status.oldest_pending_age_secs.unwrap() >= 0);

        assert_eq!(
            queue.pending_by_target().await.unwrap(),
            vec![("ventas".to_string(), 1)]
        );
    }
}
