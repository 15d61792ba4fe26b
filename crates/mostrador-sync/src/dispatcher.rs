//! # Sync Dispatcher
//!
//! Drains the durable queue to the remote store, one batch at a time.
//!
//! ## Drain Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Dispatcher State Machine                             │
//! │                                                                         │
//! │        timer / force_sync                                              │
//! │   Idle ───────────────────► Draining ──────────────► Idle              │
//! │    ▲                           │     all processed                     │
//! │    │                           │                                        │
//! │    │     backoff elapsed       │ transient failure                     │
//! │    └──────── BackingOff ◄──────┘ (batch aborted)                       │
//! │              10s → 30s → 30s                                           │
//! │                                                                         │
//! │  Per operation (in next_batch order):                                  │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │ mark_in_flight → sanitize                                        │   │
//! │  │   SkipEmpty / SkipMissingIdentifier → mark_skipped               │   │
//! │  │   else remote.apply (time-bounded)                               │   │
//! │  │     Success            → mark_completed                          │   │
//! │  │     StructuralFailure  → mark_retry, continue                    │   │
//! │  │     TransientFailure   → mark_retry, abort batch, back off       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only one drain runs at a time per dispatcher; a second request while one
//! is running returns immediately with `ran == false`. If recording an
//! outcome fails locally, the operation is released back to Pending and the
//! drain ends with the error.

use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use mostrador_core::{
    sanitize, DependencyRanker, Operation, OperationId, OperationStatus, SchemaDescriptor,
};
use mostrador_db::SyncQueueRepository;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::remote::{Outcome, RemoteStore};

// =============================================================================
// Configuration
// =============================================================================

/// Dispatcher timing and batch settings.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Operations per drain cycle.
    pub batch_size: u32,
    /// Wait between drain cycles in auto mode.
    pub poll_interval: Duration,
    /// Time bound for one remote call.
    pub remote_timeout: Duration,
    /// First wait after a transient failure.
    pub initial_backoff: Duration,
    /// Cap on the wait between attempts.
    pub max_backoff: Duration,
    /// Growth factor between waits.
    pub backoff_multiplier: f64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            batch_size: mostrador_core::DEFAULT_BATCH_SIZE,
            poll_interval: Duration::from_secs(10),
            remote_timeout: Duration::from_secs(5),
            initial_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 3.0,
        }
    }
}

// =============================================================================
// Status
// =============================================================================

/// What the dispatcher is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatcherState {
    #[default]
    Idle,
    Draining,
    BackingOff,
    Stopped,
}

impl std::fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatcherState::Idle => write!(f, "idle"),
            DispatcherState::Draining => write!(f, "draining"),
            DispatcherState::BackingOff => write!(f, "backing_off"),
            DispatcherState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Summary of one drain cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// False when another drain was already running.
    pub ran: bool,
    /// Operations taken from the queue.
    pub batch: usize,
    pub completed: usize,
    pub skipped: usize,
    /// Returned to pending after a failure.
    pub retried: usize,
    /// Parked as failed after reaching the attempt ceiling.
    pub failed: usize,
    /// The remote became unreachable and the rest of the batch was left.
    pub aborted: bool,
    pub last_error: Option<String>,
}

/// Snapshot published by the dispatcher.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatcherStatus {
    pub state: DispatcherState,
    pub last_run: Option<DrainReport>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Current wait while backing off.
    pub backoff: Option<Duration>,
    pub drains: u64,
}

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Receives dispatcher events (UI, metrics, logs).
pub trait SyncEventEmitter: Send + Sync {
    fn emit_state(&self, state: DispatcherState);

    fn emit_drained(&self, report: &DrainReport);

    fn emit_error(&self, message: &str, retryable: bool);
}

/// No-op event emitter.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit_state(&self, _state: DispatcherState) {}
    fn emit_drained(&self, _report: &DrainReport) {}
    fn emit_error(&self, _message: &str, _retryable: bool) {}
}

// =============================================================================
// Dispatcher
// =============================================================================

enum Step {
    Completed,
    Skipped,
    Retried {
        parked: bool,
        transient: bool,
        detail: String,
    },
}

type ForceReply = oneshot::Sender<SyncResult<DrainReport>>;

/// Drains the queue to a [`RemoteStore`].
pub struct SyncDispatcher<R> {
    queue: SyncQueueRepository,
    remote: Arc<R>,
    schema: Arc<SchemaDescriptor>,
    ranker: Arc<DependencyRanker>,
    config: DispatcherConfig,
    status: Arc<RwLock<DispatcherStatus>>,
    emitter: Arc<dyn SyncEventEmitter>,
    drain_guard: Arc<Mutex<()>>,
}

impl<R> Clone for SyncDispatcher<R> {
    fn clone(&self) -> Self {
        SyncDispatcher {
            queue: self.queue.clone(),
            remote: self.remote.clone(),
            schema: self.schema.clone(),
            ranker: self.ranker.clone(),
            config: self.config.clone(),
            status: self.status.clone(),
            emitter: self.emitter.clone(),
            drain_guard: self.drain_guard.clone(),
        }
    }
}

impl<R: RemoteStore> SyncDispatcher<R> {
    /// Creates a dispatcher with a no-op emitter.
    pub fn new(
        queue: SyncQueueRepository,
        remote: Arc<R>,
        schema: Arc<SchemaDescriptor>,
        ranker: Arc<DependencyRanker>,
        config: DispatcherConfig,
    ) -> Self {
        SyncDispatcher {
            queue,
            remote,
            schema,
            ranker,
            config,
            status: Arc::new(RwLock::new(DispatcherStatus::default())),
            emitter: Arc::new(NoOpEmitter),
            drain_guard: Arc::new(Mutex::new(())),
        }
    }

    /// Replaces the event emitter.
    pub fn with_emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    /// Returns the current status snapshot.
    pub async fn status(&self) -> DispatcherStatus {
        self.status.read().await.clone()
    }

    // =========================================================================
    // Drain
    // =========================================================================

    /// Runs one drain cycle, unless one is already running.
    ///
    /// ## Returns
    /// * `Ok(report)` - `report.ran` is false if the cycle was skipped
    /// * `Err(SyncError)` - the local store failed; the cycle ended early
    pub async fn drain_once(&self) -> SyncResult<DrainReport> {
        let Ok(_guard) = self.drain_guard.try_lock() else {
            debug!("Drain already running, skipping");
            return Ok(DrainReport::default());
        };

        self.drain(Uuid::new_v4()).await
    }

    #[instrument(name = "drain", skip(self))]
    async fn drain(&self, run_id: Uuid) -> SyncResult<DrainReport> {
        self.set_state(DispatcherState::Draining).await;

        let result = self.drain_batch().await;

        {
            let mut status = self.status.write().await;
            status.state = DispatcherState::Idle;
            status.last_run_at = Some(Utc::now());
            status.drains += 1;
            match &result {
                Ok(report) => {
                    status.last_run = Some(report.clone());
                    if report.last_error.is_some() {
                        status.last_error = report.last_error.clone();
                    }
                }
                Err(e) => status.last_error = Some(e.to_string()),
            }
        }
        self.emitter.emit_state(DispatcherState::Idle);

        if let Ok(report) = &result {
            self.emitter.emit_drained(report);
        }
        result
    }

    async fn drain_batch(&self) -> SyncResult<DrainReport> {
        let batch = self
            .queue
            .next_batch(&self.ranker, self.config.batch_size)
            .await?;

        let mut report = DrainReport {
            ran: true,
            batch: batch.len(),
            ..Default::default()
        };

        if batch.is_empty() {
            debug!("No pending operations");
            return Ok(report);
        }

        info!(count = batch.len(), "Draining batch");

        for op in &batch {
            self.queue.mark_in_flight(op.id).await?;

            let step = match self.deliver(op).await {
                Ok(step) => step,
                Err(err) => {
                    self.release(op.id, &err).await;
                    return Err(err);
                }
            };

            match step {
                Step::Completed => report.completed += 1,
                Step::Skipped => report.skipped += 1,
                Step::Retried {
                    parked,
                    transient,
                    detail,
                } => {
                    if parked {
                        report.failed += 1;
                    } else {
                        report.retried += 1;
                    }
                    report.last_error = Some(detail);

                    if transient {
                        report.aborted = true;
                        warn!(
                            op_id = op.id,
                            left = report.batch - report.completed - report.skipped - report.retried - report.failed,
                            "Remote unavailable, aborting batch"
                        );
                        break;
                    }
                }
            }
        }

        info!(
            completed = report.completed,
            skipped = report.skipped,
            retried = report.retried,
            failed = report.failed,
            aborted = report.aborted,
            "Drain finished"
        );

        Ok(report)
    }

    /// Sanitizes and delivers one InFlight operation, then records the
    /// outcome.
    async fn deliver(&self, op: &Operation) -> SyncResult<Step> {
        let cleaned = sanitize(&self.schema, &op.target, op.kind, &op.payload);
        for (field, reason) in &cleaned.dropped {
            debug!(op_id = op.id, field = %field, ?reason, "Field dropped");
        }

        if cleaned.decision.is_skip() {
            let reason = cleaned.decision.reason();
            self.queue.mark_skipped(op.id, reason).await?;
            debug!(op_id = op.id, target = %op.target, reason, "Operation skipped");
            return Ok(Step::Skipped);
        }

        let call = self.remote.apply(&op.target, op.kind, &cleaned.payload);
        let outcome = match timeout(self.config.remote_timeout, call).await {
            Ok(outcome) => outcome,
            Err(_) => Outcome::TransientFailure(format!(
                "remote call timed out after {} ms",
                self.config.remote_timeout.as_millis()
            )),
        };

        let (detail, transient) = match outcome {
            Outcome::Success => {
                self.queue.mark_completed(op.id).await?;
                debug!(op_id = op.id, target = %op.target, kind = %op.kind, "Operation delivered");
                return Ok(Step::Completed);
            }
            Outcome::StructuralFailure(detail) => (detail, false),
            Outcome::TransientFailure(detail) => (detail, true),
        };

        let status = self.queue.mark_retry(op.id, &detail).await?;
        warn!(
            op_id = op.id,
            target = %op.target,
            attempts = op.attempts + 1,
            transient,
            error = %detail,
            "Delivery failed"
        );

        Ok(Step::Retried {
            parked: status == OperationStatus::Failed,
            transient,
            detail,
        })
    }

    /// Puts an InFlight operation back to Pending after its outcome could
    /// not be recorded locally, so the next drain picks it up again.
    async fn release(&self, id: OperationId, cause: &SyncError) {
        warn!(op_id = id, error = %cause, "Local bookkeeping failed, releasing operation");
        if let Err(e) = self.queue.release_in_flight(id).await {
            error!(op_id = id, error = %e, "Operation left in flight until restart");
        }
    }

    // =========================================================================
    // Background Loop
    // =========================================================================

    /// Spawns the dispatcher loop. With `periodic` the loop drains on its
    /// own timer; otherwise only on [`DispatcherHandle::force_sync`].
    pub fn spawn(self, periodic: bool) -> (DispatcherHandle, JoinHandle<()>) {
        let (force_tx, force_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let handle = DispatcherHandle {
            force_tx,
            shutdown_tx,
            status: self.status.clone(),
        };

        let task = tokio::spawn(self.run(periodic, force_rx, shutdown_rx));
        (handle, task)
    }

    async fn run(
        self,
        periodic: bool,
        mut force_rx: mpsc::Receiver<ForceReply>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        info!(periodic, "Sync dispatcher starting");

        let mut backoff = self.create_backoff();
        let mut wait = periodic.then_some(Duration::ZERO);

        loop {
            tokio::select! {
                _ = sleep_for(wait) => {
                    let result = self.drain_once().await;
                    wait = self.schedule(&result, &mut backoff, periodic).await;
                }

                Some(reply) = force_rx.recv() => {
                    debug!("Forced drain requested");
                    let result = self.drain_once().await;
                    wait = self.schedule(&result, &mut backoff, periodic).await;
                    let _ = reply.send(result);
                }

                _ = shutdown_rx.recv() => {
                    info!("Sync dispatcher shutting down");
                    break;
                }
            }
        }

        self.set_state(DispatcherState::Stopped).await;
        info!("Sync dispatcher stopped");
    }

    /// Picks the wait before the next timed drain.
    async fn schedule(
        &self,
        result: &SyncResult<DrainReport>,
        backoff: &mut ExponentialBackoff,
        periodic: bool,
    ) -> Option<Duration> {
        match result {
            Ok(report) if report.aborted => {
                let message = report.last_error.as_deref().unwrap_or("remote unavailable");
                self.emitter.emit_error(message, true);

                if !periodic {
                    return None;
                }

                let delay = backoff.next_backoff().unwrap_or(self.config.max_backoff);
                warn!(?delay, "Backing off");
                {
                    let mut status = self.status.write().await;
                    status.state = DispatcherState::BackingOff;
                    status.backoff = Some(delay);
                }
                self.emitter.emit_state(DispatcherState::BackingOff);
                return Some(delay);
            }
            Ok(report) if report.ran => {
                backoff.reset();
                self.status.write().await.backoff = None;
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "Drain cycle failed");
                self.emitter.emit_error(&e.to_string(), e.is_retryable());
            }
        }

        periodic.then_some(self.config.poll_interval)
    }

    /// Exponential backoff with no jitter and no overall limit.
    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.config.initial_backoff,
            max_interval: self.config.max_backoff,
            multiplier: self.config.backoff_multiplier,
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    async fn set_state(&self, state: DispatcherState) {
        self.status.write().await.state = state;
        self.emitter.emit_state(state);
    }
}

async fn sleep_for(wait: Option<Duration>) {
    match wait {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending::<()>().await,
    }
}

// =============================================================================
// Dispatcher Handle
// =============================================================================

/// Handle for controlling a spawned dispatcher.
#[derive(Clone)]
pub struct DispatcherHandle {
    force_tx: mpsc::Sender<ForceReply>,
    shutdown_tx: mpsc::Sender<()>,
    status: Arc<RwLock<DispatcherStatus>>,
}

impl DispatcherHandle {
    /// Wakes the dispatcher and waits for the resulting drain.
    pub async fn force_sync(&self) -> SyncResult<DrainReport> {
        let (tx, rx) = oneshot::channel();
        self.force_tx
            .send(tx)
            .await
            .map_err(|_| SyncError::ShuttingDown)?;
        rx.await.map_err(|_| SyncError::ShuttingDown)?
    }

    /// Gets the current dispatcher status.
    pub async fn status(&self) -> DispatcherStatus {
        self.status.read().await.clone()
    }

    /// Signals the loop to stop after the current drain.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Shutdown channel closed".into()))
    }
}

// =============================================================================
// Tests
// =============================================================================
