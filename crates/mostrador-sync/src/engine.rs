//! # Sync Engine
//!
//! Public entry point: owns the local store, the queue, and the dispatcher
//! task for one process.
//!
//! ## Engine Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         SyncEngine Lifecycle                            │
//! │                                                                         │
//! │  connect(config) / SyncEngineBuilder::build()                          │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  start()                                                               │
//! │    1. recover_in_flight()   (crash leftovers back to Pending)          │
//! │    2. OFFLINE → stop here, queue only                                  │
//! │       MANUAL  → spawn dispatcher, drains on force_sync only            │
//! │       AUTO    → spawn dispatcher, drains on timer + force_sync         │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  enqueue / mutations().apply   (business code, any task)              │
//! │  force_sync                    ("sync now", reconnection)             │
//! │  queue_status / status         (dashboards, syncctl)                  │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  shutdown()  (waits for the current drain to finish)                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use mostrador_core::{DependencyRanker, OperationId, OperationKind, Payload, SchemaDescriptor};
use mostrador_db::{Database, LocalMutationRepository, QueueStatus};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{SyncConfig, SyncMode};
use crate::dispatcher::{
    DispatcherHandle, DispatcherStatus, DrainReport, NoOpEmitter, SyncDispatcher, SyncEventEmitter,
};
use crate::error::{SyncError, SyncResult};
use crate::remote::{RemoteStore, SqlRemoteStore};

// =============================================================================
// Engine Status
// =============================================================================

/// Combined engine status for external queries.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub mode: SyncMode,
    /// Whether the background dispatcher task is running.
    pub running: bool,
    pub dispatcher: DispatcherStatus,
    pub queue: QueueStatus,
}

// =============================================================================
// Sync Engine
// =============================================================================

/// Offline-first sync engine handle.
pub struct SyncEngine<R: RemoteStore = SqlRemoteStore> {
    config: Arc<SyncConfig>,
    db: Database,
    schema: Arc<SchemaDescriptor>,
    /// Absent in offline mode without a remote.
    dispatcher: Option<SyncDispatcher<R>>,
    handle: Option<DispatcherHandle>,
    task: Option<JoinHandle<()>>,
}

impl SyncEngine<SqlRemoteStore> {
    /// Opens the local store and configures the SQL remote from `config`.
    ///
    /// The remote pool connects lazily, so this succeeds while offline.
    pub async fn connect(config: SyncConfig) -> SyncResult<Self> {
        config.validate()?;

        let db = Database::new(config.db_config()).await?;
        let schema = Arc::new(SchemaDescriptor::pos_default());

        let mut builder = SyncEngineBuilder::new(config.clone()).with_database(db);

        if let Some(url) = config.remote_url() {
            let remote = SqlRemoteStore::connect_lazy(url, schema, config.remote_connect_timeout())?;
            builder = builder.with_remote(Arc::new(remote));
        }

        builder.build()
    }
}

impl<R: RemoteStore> SyncEngine<R> {
    /// Recovers interrupted deliveries and starts the dispatcher per mode.
    pub async fn start(&mut self) -> SyncResult<()> {
        if self.handle.is_some() {
            return Ok(());
        }

        let recovered = self.db.queue().recover_in_flight().await?;
        if recovered > 0 {
            warn!(recovered, "Returned interrupted operations to pending");
        }

        let mode = self.config.mode();
        if !mode.is_sync_enabled() {
            info!("Sync is disabled (mode: offline), queueing only");
            return Ok(());
        }

        let dispatcher = self
            .dispatcher
            .clone()
            .ok_or_else(|| SyncError::InvalidConfig("Remote store required".into()))?;

        info!(mode = %mode, "Starting sync engine");

        let (handle, task) = dispatcher.spawn(mode.is_periodic());
        self.handle = Some(handle);
        self.task = Some(task);

        Ok(())
    }

    /// Stops the dispatcher after its current drain.
    pub async fn shutdown(&mut self) -> SyncResult<()> {
        info!("Shutting down sync engine");

        if let Some(handle) = self.handle.take() {
            let _ = handle.shutdown().await;
        }
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| SyncError::Internal(format!("Dispatcher task failed: {e}")))?;
        }

        info!("Sync engine stopped");
        Ok(())
    }

    /// Durably queues one operation. Works in every mode.
    ///
    /// An error means nothing was queued; the caller must abort the
    /// business mutation it belongs to.
    pub async fn enqueue(
        &self,
        target: &str,
        kind: OperationKind,
        payload: &Payload,
    ) -> SyncResult<OperationId> {
        Ok(self.db.queue().enqueue(target, kind, payload).await?)
    }

    /// Writer that applies a mutation locally and queues it atomically.
    pub fn mutations(&self) -> LocalMutationRepository {
        self.db.mutations(self.schema.clone())
    }

    /// Runs a drain now and waits for it.
    ///
    /// Returns a report with `ran == false` if a drain was already running.
    pub async fn force_sync(&self) -> SyncResult<DrainReport> {
        if !self.config.is_sync_enabled() {
            return Err(SyncError::Offline);
        }

        match (&self.handle, &self.dispatcher) {
            (Some(handle), _) => handle.force_sync().await,
            (None, Some(dispatcher)) => dispatcher.drain_once().await,
            (None, None) => Err(SyncError::NotStarted),
        }
    }

    /// Queue counts per status plus oldest pending age.
    pub async fn queue_status(&self) -> SyncResult<QueueStatus> {
        Ok(self.db.queue().status().await?)
    }

    pub async fn status(&self) -> SyncResult<SyncStatus> {
        let dispatcher = match &self.dispatcher {
            Some(dispatcher) => dispatcher.status().await,
            None => DispatcherStatus::default(),
        };

        Ok(SyncStatus {
            mode: self.config.mode(),
            running: self.handle.is_some(),
            dispatcher,
            queue: self.queue_status().await?,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn schema(&self) -> &SchemaDescriptor {
        &self.schema
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for creating a SyncEngine with options.
pub struct SyncEngineBuilder<R: RemoteStore = SqlRemoteStore> {
    config: SyncConfig,
    db: Option<Database>,
    remote: Option<Arc<R>>,
    schema: Option<SchemaDescriptor>,
    ranker: Option<DependencyRanker>,
    emitter: Option<Arc<dyn SyncEventEmitter>>,
}

impl<R: RemoteStore> SyncEngineBuilder<R> {
    /// Creates a new builder with the given config.
    pub fn new(config: SyncConfig) -> Self {
        SyncEngineBuilder {
            config,
            db: None,
            remote: None,
            schema: None,
            ranker: None,
            emitter: None,
        }
    }

    /// Sets the local database.
    pub fn with_database(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    /// Sets the remote store.
    pub fn with_remote(mut self, remote: Arc<R>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Replaces the default point-of-sale schema.
    pub fn with_schema(mut self, schema: SchemaDescriptor) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Replaces the default table ranking.
    pub fn with_ranker(mut self, ranker: DependencyRanker) -> Self {
        self.ranker = Some(ranker);
        self
    }

    /// Sets the event emitter.
    pub fn with_emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Builds the SyncEngine.
    ///
    /// ## Errors
    /// * `SyncError::InvalidConfig` - bad settings, no database, or no remote
    ///   in a mode that drains
    /// * `SyncError::Schema` - the ranking puts a table before one it references
    pub fn build(self) -> SyncResult<SyncEngine<R>> {
        self.config.validate_settings()?;

        let db = self
            .db
            .ok_or_else(|| SyncError::InvalidConfig("Database required".into()))?;

        let schema = Arc::new(self.schema.unwrap_or_else(SchemaDescriptor::pos_default));
        let ranker = self.ranker.unwrap_or_else(DependencyRanker::pos_default);
        ranker.check_against(&schema)?;

        if self.remote.is_none() && self.config.is_sync_enabled() {
            return Err(SyncError::InvalidConfig(format!(
                "Remote store required in {} mode",
                self.config.mode()
            )));
        }

        let emitter = self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter));
        let ranker = Arc::new(ranker);
        let dispatcher_config = self.config.dispatcher_config();

        let dispatcher = self.remote.map(|remote| {
            SyncDispatcher::new(db.queue(), remote, schema.clone(), ranker, dispatcher_config)
                .with_emitter(emitter)
        });

        Ok(SyncEngine {
            config: Arc::new(self.config),
            db,
            schema,
            dispatcher,
            handle: None,
            task: None,
        })
    }
}
