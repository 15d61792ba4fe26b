//! # mostrador-db: Local Durable Store for Mostrador
//!
//! This crate owns the on-device SQLite database. It holds the sync queue
//! and the point-of-sale tables the queue mirrors to the remote store.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Mostrador Data Flow                              │
//! │                                                                         │
//! │  Business code (register sale, adjust stock)                           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  mostrador-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ SyncQueue     │    │ 001_sync_    │  │   │
//! │  │   │ SqlitePool    │◄───│ LocalMutation │    │   queue.sql  │  │   │
//! │  │   │ WAL, FKs on   │    │               │    │ 002_local_   │  │   │
//! │  │   │               │    │               │    │   catalog.sql│  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   ~/.local/share/pos/mostrador.db (platform data dir)           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Queue and local mutation repositories
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mostrador_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/mostrador.db")).await?;
//!
//! // Business write and queue entry commit together
//! let applied = db
//!     .mutations(schema.clone())
//!     .apply("productos", OperationKind::Modify, &payload)
//!     .await?;
//!
//! // Dispatcher side
//! let batch = db.queue().next_batch(&ranker, 10).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::local::{LocalMutation, LocalMutationRepository};
pub use repository::queue::{QueueStatus, SyncQueueRepository};
