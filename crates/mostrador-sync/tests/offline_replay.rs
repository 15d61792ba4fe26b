use std::path::Path;
use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tempfile::TempDir;

use mostrador_core::{OperationKind, OperationStatus, Payload, SchemaDescriptor, Value};
use mostrador_sync::{
    Outcome, RemoteStore, SqlRemoteStore, SyncConfig, SyncEngine, SyncError, SyncMode,
};

const REMOTE_SCHEMA: &str = include_str!("../../../migrations/sqlite/002_local_catalog.sql");

fn payload(fields: &[(&str, Value)]) -> Payload {
    fields
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Creates a SQLite file with the catalog tables to act as the remote.
async fn remote_db(dir: &Path) -> (String, SqlitePool) {
    let path = dir.join("remote.db");
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&format!("sqlite://{}?mode=rwc", path.display()))
        .await
        .expect("remote pool");
    sqlx::raw_sql(REMOTE_SCHEMA)
        .execute(&pool)
        .await
        .expect("remote schema");

    (format!("sqlite://{}", path.display()), pool)
}

fn manual_config(dir: &Path, remote_url: &str) -> SyncConfig {
    let mut config = SyncConfig::default();
    config.database.path = Some(dir.join("local.db"));
    config.remote.url = Some(remote_url.to_string());
    config.remote.connect_timeout_secs = 1;
    config.sync.mode = SyncMode::Manual;
    config.sync.remote_timeout_secs = 2;
    config
}

#[tokio::test]
async fn create_reaches_remote() {
    let tmp = TempDir::new().expect("tmp");
    let (url, remote) = remote_db(tmp.path()).await;
    let engine = SyncEngine::connect(manual_config(tmp.path(), &url))
        .await
        .expect("engine");

    let id = engine
        .enqueue(
            "categorias",
            OperationKind::Create,
            &payload(&[("nombre", Value::Text("Bebidas".into()))]),
        )
        .await
        .expect("enqueue");

    let report = engine.force_sync().await.expect("drain");
    assert_eq!(report.completed, 1);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM categorias WHERE nombre = 'Bebidas'")
        .fetch_one(&remote)
        .await
        .expect("count");
    assert_eq!(count, 1);

    let op = engine.database().queue().get(id).await.expect("get").expect("row");
    assert_eq!(op.status, OperationStatus::Completed);
}

#[tokio::test]
async fn child_retries_until_parent_lands() {
    let tmp = TempDir::new().expect("tmp");
    let (url, remote) = remote_db(tmp.path()).await;
    let engine = SyncEngine::connect(manual_config(tmp.path(), &url))
        .await
        .expect("engine");

    let producto = engine
        .enqueue(
            "productos",
            OperationKind::Create,
            &payload(&[
                ("id", Value::Int(10)),
                ("nombre", Value::Text("Agua 500ml".into())),
                ("precio", Value::Text("1.50".into())),
                ("categoria_id", Value::Int(3)),
            ]),
        )
        .await
        .expect("enqueue");

    let first = engine.force_sync().await.expect("drain");
    assert_eq!(first.retried, 1);
    assert!(!first.aborted);

    let op = engine.database().queue().get(producto).await.expect("get").expect("row");
    assert_eq!(op.status, OperationStatus::Pending);
    assert_eq!(op.attempts, 1);
    assert!(op.last_error.is_some());

    engine
        .enqueue(
            "categorias",
            OperationKind::Create,
            &payload(&[("id", Value::Int(3)), ("nombre", Value::Text("Bebidas".into()))]),
        )
        .await
        .expect("enqueue");

    let second = engine.force_sync().await.expect("drain");
    assert_eq!(second.completed, 2);

    let (categoria_id, precio): (i64, f64) =
        sqlx::query_as("SELECT categoria_id, precio FROM productos WHERE id = 10")
            .fetch_one(&remote)
            .await
            .expect("producto");
    assert_eq!(categoria_id, 3);
    assert!((precio - 1.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn local_mutations_replay_with_same_identity() {
    let tmp = TempDir::new().expect("tmp");
    let (url, remote) = remote_db(tmp.path()).await;
    let engine = SyncEngine::connect(manual_config(tmp.path(), &url))
        .await
        .expect("engine");
    let mutations = engine.mutations();

    let created = mutations
        .apply(
            "categorias",
            OperationKind::Create,
            &payload(&[("nombre", Value::Text("Lácteos".into())), ("activo", Value::Int(1))]),
        )
        .await
        .expect("create");

    mutations
        .apply(
            "categorias",
            OperationKind::Modify,
            &payload(&[
                ("id", Value::Int(created.row_id)),
                ("descripcion", Value::Text("Leche y quesos".into())),
                ("original_query", Value::Text("UPDATE categorias SET descripcion = ?".into())),
            ]),
        )
        .await
        .expect("modify");

    let report = engine.force_sync().await.expect("drain");
    assert_eq!(report.completed, 2);

    let (id, descripcion, activo): (i64, Option<String>, bool) =
        sqlx::query_as("SELECT id, descripcion, activo FROM categorias WHERE nombre = 'Lácteos'")
            .fetch_one(&remote)
            .await
            .expect("categoria");
    assert_eq!(id, created.row_id);
    assert_eq!(descripcion.as_deref(), Some("Leche y quesos"));
    assert!(activo);

    mutations
        .apply(
            "categorias",
            OperationKind::Remove,
            &payload(&[("id", Value::Int(created.row_id))]),
        )
        .await
        .expect("remove");
    engine.force_sync().await.expect("drain");

    let left: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM categorias")
        .fetch_one(&remote)
        .await
        .expect("count");
    assert_eq!(left, 0);
}

#[tokio::test]
async fn redelivery_is_idempotent() {
    let tmp = TempDir::new().expect("tmp");
    let (url, remote) = remote_db(tmp.path()).await;
    let store = SqlRemoteStore::connect_lazy(
        &url,
        Arc::new(SchemaDescriptor::pos_default()),
        std::time::Duration::from_secs(2),
    )
    .expect("store");

    let create = payload(&[("id", Value::Int(1)), ("nombre", Value::Text("Bebidas".into()))]);
    assert_eq!(store.apply("categorias", OperationKind::Create, &create).await, Outcome::Success);
    assert_eq!(store.apply("categorias", OperationKind::Create, &create).await, Outcome::Success);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM categorias")
        .fetch_one(&remote)
        .await
        .expect("count");
    assert_eq!(count, 1);

    let remove = payload(&[("id", Value::Int(1))]);
    assert_eq!(store.apply("categorias", OperationKind::Remove, &remove).await, Outcome::Success);
    assert_eq!(store.apply("categorias", OperationKind::Remove, &remove).await, Outcome::Success);

    let missing = payload(&[("id", Value::Int(99)), ("nombre", Value::Text("x".into()))]);
    assert!(matches!(
        store.apply("categorias", OperationKind::Modify, &missing).await,
        Outcome::StructuralFailure(_)
    ));
}

#[tokio::test]
async fn queued_offline_then_replayed() {
    let tmp = TempDir::new().expect("tmp");
    let unreachable = format!("sqlite://{}", tmp.path().join("missing").join("remote.db").display());

    let id = {
        let engine = SyncEngine::connect(manual_config(tmp.path(), &unreachable))
            .await
            .expect("engine");
        let id = engine
            .enqueue(
                "vendedores",
                OperationKind::Create,
                &payload(&[("nombre", Value::Text("Ana".into()))]),
            )
            .await
            .expect("enqueue");

        let report = engine.force_sync().await.expect("drain");
        assert_eq!(report.completed, 0);

        let op = engine.database().queue().get(id).await.expect("get").expect("row");
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.attempts, 1);

        engine.database().close().await;
        id
    };

    let (url, remote) = remote_db(tmp.path()).await;
    let mut engine = SyncEngine::connect(manual_config(tmp.path(), &url))
        .await
        .expect("engine");
    engine.start().await.expect("start");

    let report = engine.force_sync().await.expect("drain");
    assert_eq!(report.completed, 1);

    let op = engine.database().queue().get(id).await.expect("get").expect("row");
    assert_eq!(op.status, OperationStatus::Completed);

    let nombre: String = sqlx::query_scalar("SELECT nombre FROM vendedores")
        .fetch_one(&remote)
        .await
        .expect("vendedor");
    assert_eq!(nombre, "Ana");

    engine.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn remove_of_absent_row_completes() {
    let tmp = TempDir::new().expect("tmp");
    let (url, remote) = remote_db(tmp.path()).await;
    let engine = SyncEngine::connect(manual_config(tmp.path(), &url))
        .await
        .expect("engine");

    let id = engine
        .enqueue(
            "productos",
            OperationKind::Remove,
            &payload(&[("id", Value::Int(42))]),
        )
        .await
        .expect("enqueue");

    let report = engine.force_sync().await.expect("drain");
    assert_eq!(report.completed, 1);
    assert_eq!(report.retried, 0);

    let op = engine.database().queue().get(id).await.expect("get").expect("row");
    assert_eq!(op.status, OperationStatus::Completed);
    assert_eq!(op.attempts, 0);
    assert_eq!(op.last_error, None);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM productos")
        .fetch_one(&remote)
        .await
        .expect("count");
    assert_eq!(count, 0);
}

#[tokio::test]
async fn non_finite_decimal_is_refused_at_enqueue() {
    let tmp = TempDir::new().expect("tmp");
    let (url, remote) = remote_db(tmp.path()).await;
    let engine = SyncEngine::connect(manual_config(tmp.path(), &url))
        .await
        .expect("engine");

    for bad in [f64::NAN, f64::INFINITY] {
        let err = engine
            .enqueue(
                "productos",
                OperationKind::Create,
                &payload(&[("nombre", Value::Text("cafe".into())), ("precio", Value::Decimal(bad))]),
            )
            .await
            .expect_err("non-finite decimal");
        assert!(matches!(err, SyncError::Database(_)));
        assert!(err.to_string().contains("non-finite"), "{err}");
    }

    let err = engine
        .mutations()
        .apply(
            "productos",
            OperationKind::Create,
            &payload(&[("nombre", Value::Text("cafe".into())), ("precio", Value::Decimal(f64::NAN))]),
        )
        .await
        .expect_err("non-finite decimal");
    assert!(err.to_string().contains("non-finite"), "{err}");

    let valid = engine
        .enqueue(
            "productos",
            OperationKind::Create,
            &payload(&[("nombre", Value::Text("cafe".into())), ("precio", Value::Decimal(2.5))]),
        )
        .await
        .expect("enqueue");

    let status = engine.queue_status().await.expect("status");
    assert_eq!(status.total(), 1);
    assert_eq!(status.failed, 0);

    let report = engine.force_sync().await.expect("drain");
    assert_eq!(report.completed, 1);
    let op = engine.database().queue().get(valid).await.expect("get").expect("row");
    assert_eq!(op.status, OperationStatus::Completed);

    let precio: f64 = sqlx::query_scalar("SELECT precio FROM productos WHERE nombre = 'cafe'")
        .fetch_one(&remote)
        .await
        .expect("producto");
    assert!((precio - 2.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn connect_creates_missing_data_directory() {
    let tmp = TempDir::new().expect("tmp");
    let path = tmp.path().join("datos").join("mostrador").join("local.db");

    let mut config = SyncConfig::default();
    config.database.path = Some(path.clone());
    config.sync.mode = SyncMode::Offline;

    let mut engine = SyncEngine::connect(config).await.expect("engine");
    engine.start().await.expect("start");
    engine
        .enqueue(
            "vendedores",
            OperationKind::Create,
            &payload(&[("nombre", Value::Text("Ana".into()))]),
        )
        .await
        .expect("enqueue");

    assert!(path.exists());
    assert_eq!(engine.queue_status().await.expect("status").pending, 1);
    engine.shutdown().await.expect("shutdown");
}
