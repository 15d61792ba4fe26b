//! # Payload Values
//!
//! A mutation payload is a map of column name to a tagged scalar. Every
//! value carries its representation explicitly so coercion can match on it
//! exhaustively.
//!
//! ## Stored Form
//! ```text
//! {
//!   "nombre": { "type": "text",    "value": "Bebidas" },
//!   "activo": { "type": "int",     "value": 1 },
//!   "precio": { "type": "decimal", "value": 2.5 },
//!   "notas":  { "type": "null" }
//! }
//! ```
//!
//! The raw payload is what gets persisted in the queue. Cleaning happens at
//! drain time, so the stored form must round-trip losslessly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{CoreError, CoreResult};

/// Column name → value. Ordered so serialization and iteration are stable.
pub type Payload = BTreeMap<String, Value>;

// =============================================================================
// Value
// =============================================================================

/// A single scalar inside a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Bool(bool),
    Int(i64),
    Decimal(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Null,
}

impl Value {
    /// Returns true for `Value::Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the representation, used in logs and drop reports.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Decimal(_) => "decimal",
            Value::Text(_) => "text",
            Value::Timestamp(_) => "timestamp",
            Value::Null => "null",
        }
    }

    /// Returns the text if this is a `Text` value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Converts an untyped JSON value.
    ///
    /// Integers that fit in `i64` become `Int`, other numbers `Decimal`.
    /// Strings stay `Text`; the sanitizer decides later whether a string is
    /// really a timestamp or a number. Arrays and objects are kept as their
    /// JSON text so nothing is silently lost.
    pub fn from_json(value: &serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Decimal).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Text(s.clone()),
            other => Value::Text(other.to_string()),
        }
    }

    /// Converts back to untyped JSON (timestamps as RFC 3339 text).
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Decimal(d) => serde_json::Number::from_f64(*d)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Timestamp(ts) => serde_json::Value::String(ts.to_rfc3339()),
            Value::Null => serde_json::Value::Null,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Text(s) => write!(f, "{:?}", s),
            Value::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
            Value::Null => write!(f, "null"),
        }
    }
}

// =============================================================================
// Conversions
// =============================================================================

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Decimal(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Builds a payload from a JSON object.
///
/// ## Returns
/// * `Ok(Payload)` - one entry per object key
/// * `Err(CoreError::PayloadDecode)` - the JSON is not an object
pub fn payload_from_json(value: &serde_json::Value) -> CoreResult<Payload> {
    let object = value
        .as_object()
        .ok_or_else(|| CoreError::PayloadDecode("payload must be a JSON object".into()))?;

    Ok(object
        .iter()
        .map(|(k, v)| (k.clone(), Value::from_json(v)))
        .collect())
}

/// Encodes a payload into its stored JSON text.
///
/// ## Returns
/// * `Ok(String)` - text that [`decode_payload`] reads back unchanged
/// * `Err(CoreError::NonFiniteDecimal)` - a decimal is NaN or infinite
pub fn encode_payload(payload: &Payload) -> CoreResult<String> {
    ensure_finite(payload)?;
    Ok(serde_json::to_string(payload)?)
}

/// Fails on the first decimal that is NaN or infinite.
pub fn ensure_finite(payload: &Payload) -> CoreResult<()> {
    let non_finite = payload
        .iter()
        .find(|(_, v)| matches!(v, Value::Decimal(d) if !d.is_finite()));

    match non_finite {
        Some((field, _)) => Err(CoreError::NonFiniteDecimal {
            field: field.clone(),
        }),
        None => Ok(()),
    }
}

/// Decodes a payload from its stored JSON text.
pub fn decode_payload(raw: &str) -> CoreResult<Payload> {
    Ok(serde_json::from_str(raw)?)
}
