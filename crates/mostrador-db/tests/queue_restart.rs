use std::collections::BTreeSet;
use std::sync::Arc;

use tempfile::TempDir;

use mostrador_core::{DependencyRanker, OperationKind, OperationStatus, Payload, SchemaDescriptor, Value};
use mostrador_db::{Database, DbConfig};

fn named(nombre: &str) -> Payload {
    let mut payload = Payload::new();
    payload.insert("nombre".to_string(), Value::Text(nombre.to_string()));
    payload
}

#[tokio::test]
async fn queue_state_survives_reopen() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("mostrador.db");

    let (completed, retried, in_flight, untouched) = {
        let db = Database::new(DbConfig::new(&db_path)).await.expect("open");
        let queue = db.queue();

        let completed = queue.enqueue("categorias", OperationKind::Create, &named("a")).await.expect("enqueue");
        let retried = queue.enqueue("categorias", OperationKind::Create, &named("b")).await.expect("enqueue");
        let in_flight = queue.enqueue("categorias", OperationKind::Create, &named("c")).await.expect("enqueue");
        let untouched = queue.enqueue("productos", OperationKind::Create, &named("d")).await.expect("enqueue");

        queue.mark_in_flight(completed).await.expect("in flight");
        queue.mark_completed(completed).await.expect("completed");
        queue.mark_in_flight(retried).await.expect("in flight");
        queue.mark_retry(retried, "connection refused").await.expect("retry");
        queue.mark_in_flight(in_flight).await.expect("in flight");

        db.close().await;
        (completed, retried, in_flight, untouched)
    };

    let db = Database::new(DbConfig::new(&db_path)).await.expect("reopen");
    let queue = db.queue();

    assert_eq!(queue.recover_in_flight().await.expect("recover"), 1);

    let done = queue.get(completed).await.expect("get").expect("row");
    assert_eq!(done.status, OperationStatus::Completed);

    let again = queue.get(retried).await.expect("get").expect("row");
    assert_eq!(again.status, OperationStatus::Pending);
    assert_eq!(again.attempts, 1);
    assert_eq!(again.last_error.as_deref(), Some("connection refused"));

    let ids: Vec<_> = queue
        .next_batch(&DependencyRanker::pos_default(), 10)
        .await
        .expect("batch")
        .into_iter()
        .map(|op| op.id)
        .collect();
    assert_eq!(ids, vec![retried, in_flight, untouched]);
}

#[tokio::test]
async fn concurrent_enqueue_keeps_every_entry() {
    let tmp = TempDir::new().expect("tmp");
    let db = Database::new(DbConfig::new(tmp.path().join("mostrador.db")))
        .await
        .expect("open");

    let mut handles = Vec::new();
    for i in 0..20 {
        let queue = db.queue();
        handles.push(tokio::spawn(async move {
            queue
                .enqueue("ventas", OperationKind::Create, &named(&format!("venta-{i}")))
                .await
        }));
    }

    let mut ids = BTreeSet::new();
    for handle in handles {
        ids.insert(handle.await.expect("join").expect("enqueue"));
    }

    assert_eq!(ids.len(), 20);
    assert_eq!(db.queue().count_pending().await.expect("count"), 20);
}

#[tokio::test]
async fn rejected_local_write_leaves_queue_untouched() {
    let tmp = TempDir::new().expect("tmp");
    let db = Database::new(DbConfig::new(tmp.path().join("mostrador.db")))
        .await
        .expect("open");
    let mutations = db.mutations(Arc::new(SchemaDescriptor::pos_default()));

    let mut orphan = Payload::new();
    orphan.insert("venta_id".to_string(), Value::Int(404));
    orphan.insert("producto_id".to_string(), Value::Int(404));
    orphan.insert("cantidad".to_string(), Value::Int(1));
    orphan.insert("precio_unitario".to_string(), Value::Decimal(1.5));
    orphan.insert("subtotal".to_string(), Value::Decimal(1.5));

    let err = mutations
        .apply("detalle_ventas", OperationKind::Create, &orphan)
        .await
        .expect_err("foreign keys are enforced");
    assert!(matches!(err, mostrador_db::DbError::ForeignKeyViolation { .. }));

    let status = db.queue().status().await.expect("status");
    assert_eq!(status.total(), 0);
}
