//! # Repository Module
//!
//! Repositories over the local SQLite store.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Local Store Repositories                             │
//! │                                                                         │
//! │  Business code                         Dispatcher / syncctl             │
//! │       │                                     │                           │
//! │       │  db.mutations(schema).apply(..)     │  db.queue().next_batch()  │
//! │       ▼                                     ▼                           │
//! │  LocalMutationRepository ──enqueue_in──► SyncQueueRepository            │
//! │  ├── apply(target, kind, payload)        ├── enqueue / enqueue_in       │
//! │  │   one transaction:                    ├── next_batch(ranker, limit)  │
//! │  │   business row + queue row            ├── mark_* transitions         │
//! │       │                                  └── status / failed            │
//! │       ▼                                     │                           │
//! │  SQLite Database ◄──────────────────────────┘                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`SyncQueueRepository`](queue::SyncQueueRepository) - Durable sync queue
//! - [`LocalMutationRepository`](local::LocalMutationRepository) - Business
//!   writes that enqueue atomically

pub mod local;
pub mod queue;
