//! # mostrador-sync: Sync Engine for Mostrador
//!
//! Delivers locally queued mutations to the remote authoritative store,
//! so the point of sale keeps selling while the network is down.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Sync Engine Architecture                        │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                   SyncEngine (public handle)                     │  │
//! │  │                                                                  │  │
//! │  │  enqueue / mutations()  →  durable queue (mostrador-db)         │  │
//! │  │  start / shutdown / force_sync / status                          │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │                               ▼                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                     SyncDispatcher (one task)                    │  │
//! │  │                                                                  │  │
//! │  │  next_batch (ranked) → sanitize → RemoteStore::apply            │  │
//! │  │  Success → completed, Structural → retry, Transient → back off  │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │                               ▼                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │              SqlRemoteStore (sqlx AnyPool)                       │  │
//! │  │              PostgreSQL in production, SQLite in tests          │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`config`] - TOML + environment configuration, sync modes
//! - [`dispatcher`] - Drain cycle, retry and backoff loop
//! - [`engine`] - `SyncEngine` handle and builder
//! - [`error`] - Sync error types
//! - [`remote`] - `RemoteStore` trait and the SQL implementation
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mostrador_sync::{SyncConfig, SyncEngine};
//!
//! let config = SyncConfig::load(None)?;
//! let mut engine = SyncEngine::connect(config).await?;
//! engine.start().await?;
//!
//! // Business code: local write and queue entry in one transaction
//! engine.mutations().apply("productos", OperationKind::Modify, &payload).await?;
//!
//! // Operator pressed "sync now"
//! let report = engine.force_sync().await?;
//! println!("Delivered: {}", report.completed);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod remote;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{DatabaseSettings, RemoteSettings, SyncConfig, SyncMode, SyncSettings};
pub use dispatcher::{
    DispatcherConfig, DispatcherHandle, DispatcherState, DispatcherStatus, DrainReport, NoOpEmitter,
    SyncDispatcher, SyncEventEmitter,
};
pub use engine::{SyncEngine, SyncEngineBuilder, SyncStatus};
pub use error::{SyncError, SyncResult};
pub use remote::{Dialect, Outcome, RemoteStore, SqlRemoteStore};
