//! # mostrador-core: Pure Sync Logic for Mostrador
//!
//! Everything the sync engine decides without touching a store lives here:
//! what a queued mutation looks like, which columns each table declares,
//! in which order tables must reach the remote, and how a raw payload is
//! cleaned before delivery.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Mostrador Sync Architecture                        │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │           Business code (checkout, stock, catalog)              │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ enqueue(target, kind, payload)         │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ mostrador-core (THIS CRATE) ★                   │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   value   │  │  schema   │  │  ranker   │  │ sanitizer │  │   │
//! │  │   │  Value    │  │ TableSch. │  │ Dependency│  │ sanitize  │  │   │
//! │  │   │  Payload  │  │ ColumnKind│  │  Ranker   │  │ Decision  │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │       mostrador-db (queue)  /  mostrador-sync (dispatcher)      │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`value`] - Tagged payload values and the `Payload` map
//! - [`operation`] - The queued `Operation` and its kind/status enums
//! - [`schema`] - Per-table column declarations
//! - [`ranker`] - Table and kind ordering for draining
//! - [`sanitizer`] - Payload cleaning and coercion
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use mostrador_core::{sanitize, Decision, OperationKind, Payload, SchemaDescriptor, Value};
//!
//! let schema = SchemaDescriptor::pos_default();
//!
//! let mut payload = Payload::new();
//! payload.insert("nombre".into(), Value::Text("Bebidas".into()));
//! payload.insert("activo".into(), Value::Int(1));
//!
//! let cleaned = sanitize(&schema, "categorias", OperationKind::Create, &payload);
//! assert_eq!(cleaned.decision, Decision::Proceed);
//! assert_eq!(cleaned.payload.get("activo"), Some(&Value::Bool(true)));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod operation;
pub mod ranker;
pub mod sanitizer;
pub mod schema;
pub mod value;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult};
pub use operation::{Operation, OperationId, OperationKind, OperationStatus};
pub use ranker::DependencyRanker;
pub use sanitizer::{looks_like_expression, sanitize, Decision, DropReason, Sanitized};
pub use schema::{ColumnDef, ColumnKind, SchemaDescriptor, TableSchema};
pub use value::{decode_payload, encode_payload, ensure_finite, payload_from_json, Payload, Value};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default number of delivery attempts before an operation is parked as failed.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default number of operations drained per batch.
pub const DEFAULT_BATCH_SIZE: u32 = 10;
