//! # Mutation Sanitizer
//!
//! Turns a raw payload into the payload that is actually delivered.
//!
//! ## Pipeline (per field)
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  raw field                                                              │
//! │     │                                                                   │
//! │     ├── not a declared column? ─────────────► drop (Undeclared)         │
//! │     ├── null? ──────────────────────────────► drop (Null)               │
//! │     ├── text that reads as an expression? ──► drop (ExpressionLike)     │
//! │     ├── cannot become the column's kind? ───► drop (Uncoercible)        │
//! │     ▼                                                                   │
//! │  coerced field                                                          │
//! │                                                                         │
//! │  then, per operation:                                                   │
//! │     modify/remove without identifier ───────► SkipMissingIdentifier     │
//! │     modify with only the identifier left ───► SkipEmpty                 │
//! │     create with nothing left ───────────────► SkipEmpty                 │
//! │     otherwise ──────────────────────────────► Proceed                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Expression detection
//! Boolean, integer, decimal and timestamp columns use an allow-list: text is
//! kept only if it parses as a literal of that kind. When it does not, the
//! text is reported as expression-like if it carries operators, parentheses
//! or SQL keywords, and as uncoercible otherwise. Timestamp text that reads
//! as neither is passed through as given.
//!
//! Text columns cannot use an allow-list (any string is a valid literal), so
//! they use a narrow deny-list: function-call shapes, statement shapes,
//! `CURRENT_TIMESTAMP`-style keywords, `||`, and arithmetic on a column of
//! the same table.
//!
//! Everything here is pure: the same inputs always give the same output.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::operation::OperationKind;
use crate::schema::{ColumnKind, SchemaDescriptor, TableSchema};
use crate::value::{Payload, Value};

// =============================================================================
// Results
// =============================================================================

/// What the dispatcher should do with a sanitized operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Deliver the cleaned payload.
    Proceed,
    /// Nothing left to write.
    SkipEmpty,
    /// Modify/remove without a usable row identifier.
    SkipMissingIdentifier,
}

impl Decision {
    pub fn is_skip(&self) -> bool {
        !matches!(self, Decision::Proceed)
    }

    /// Reason recorded on skipped operations.
    pub fn reason(&self) -> &'static str {
        match self {
            Decision::Proceed => "proceed",
            Decision::SkipEmpty => "no data fields left after sanitizing",
            Decision::SkipMissingIdentifier => "missing row identifier",
        }
    }
}

/// Why a field was removed from the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    Undeclared,
    Null,
    ExpressionLike,
    Uncoercible,
}

/// Output of [`sanitize`].
#[derive(Debug, Clone, PartialEq)]
pub struct Sanitized {
    pub payload: Payload,
    pub decision: Decision,
    /// Removed fields, in payload key order.
    pub dropped: Vec<(String, DropReason)>,
}

// =============================================================================
// Sanitize
// =============================================================================

/// Cleans `payload` for delivery to `target`.
///
/// ## Arguments
/// * `schema` - declared tables and columns
/// * `target` - table the operation writes to
/// * `kind` - create / modify / remove
/// * `payload` - raw payload as enqueued
///
/// ## Returns
/// The cleaned payload, the decision, and the list of dropped fields. An
/// undeclared target has no declared columns, so every field is dropped.
pub fn sanitize(
    schema: &SchemaDescriptor,
    target: &str,
    kind: OperationKind,
    payload: &Payload,
) -> Sanitized {
    let table = schema.table(target);
    let mut cleaned = Payload::new();
    let mut dropped = Vec::new();

    for (field, value) in payload {
        let Some(table) = table else {
            dropped.push((field.clone(), DropReason::Undeclared));
            continue;
        };
        match clean_field(table, field, value) {
            Ok(v) => {
                cleaned.insert(field.clone(), v);
            }
            Err(reason) => dropped.push((field.clone(), reason)),
        }
    }

    let id_column = table.map(TableSchema::id_column);
    let has_id = id_column.is_some_and(|id| cleaned.contains_key(id));

    let decision = match kind {
        OperationKind::Modify | OperationKind::Remove if !has_id => {
            Decision::SkipMissingIdentifier
        }
        OperationKind::Modify if cleaned.len() == 1 => Decision::SkipEmpty,
        OperationKind::Create if cleaned.is_empty() => Decision::SkipEmpty,
        _ => Decision::Proceed,
    };

    Sanitized {
        payload: cleaned,
        decision,
        dropped,
    }
}

fn clean_field(table: &TableSchema, field: &str, value: &Value) -> Result<Value, DropReason> {
    let column = table.get(field).ok_or(DropReason::Undeclared)?;

    if value.is_null() {
        return Err(DropReason::Null);
    }

    if let Value::Text(text) = value {
        if looks_like_expression(table, column.kind, text) {
            return Err(DropReason::ExpressionLike);
        }
    }

    coerce(column.kind, value).ok_or(DropReason::Uncoercible)
}

// =============================================================================
// Coercion
// =============================================================================

/// Converts `value` to the representation of `kind`.
///
/// Boolean, integer and decimal columns normalize or reject. Timestamp and
/// text columns pass the value through unchanged; the remote store reads
/// the text itself.
pub fn coerce(kind: ColumnKind, value: &Value) -> Option<Value> {
    match kind {
        ColumnKind::Boolean => coerce_bool(value).map(Value::Bool),
        ColumnKind::Integer => coerce_int(value).map(Value::Int),
        ColumnKind::Decimal => coerce_decimal(value).map(Value::Decimal),
        ColumnKind::Timestamp | ColumnKind::Text => Some(value.clone()),
    }
}

fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Int(0) => Some(false),
        Value::Int(1) => Some(true),
        Value::Decimal(d) if *d == 0.0 => Some(false),
        Value::Decimal(d) if *d == 1.0 => Some(true),
        Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::Decimal(d) => truncate(*d),
        Value::Text(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| parse_finite(s).and_then(truncate))
        }
        _ => None,
    }
}

fn coerce_decimal(value: &Value) -> Option<f64> {
    match value {
        Value::Decimal(d) if d.is_finite() => Some(*d),
        Value::Int(i) => Some(*i as f64),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Text(s) => parse_finite(s.trim()),
        _ => None,
    }
}

/// Truncates toward zero, rejecting values outside `i64`.
fn truncate(d: f64) -> Option<i64> {
    let t = d.trunc();
    (d.is_finite() && t >= i64::MIN as f64 && t < i64::MAX as f64).then_some(t as i64)
}

fn parse_finite(s: &str) -> Option<f64> {
    // f64::from_str accepts "inf" and "NaN"; those are not literals here.
    let starts_numeric = s
        .trim_start_matches(['+', '-'])
        .starts_with(|c: char| c.is_ascii_digit() || c == '.');
    if !starts_numeric {
        return None;
    }
    s.parse::<f64>().ok().filter(|d| d.is_finite())
}

/// Parses RFC 3339, `YYYY-MM-DD HH:MM:SS[.f]`, the same with `T`, or a bare
/// date. Naive values are taken as UTC. Only used to tell a timestamp
/// literal apart from an expression; the payload keeps the original text.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn parses_as_literal(kind: ColumnKind, text: &str) -> bool {
    let value = Value::Text(text.to_string());
    match kind {
        ColumnKind::Boolean => coerce_bool(&value).is_some(),
        ColumnKind::Integer => coerce_int(&value).is_some(),
        ColumnKind::Decimal => coerce_decimal(&value).is_some(),
        ColumnKind::Timestamp => parse_timestamp(text).is_some(),
        ColumnKind::Text => true,
    }
}

// =============================================================================
// Expression Detection
// =============================================================================

/// Keywords whose presence in a non-literal marks it as an expression.
const EXPRESSION_KEYWORDS: &[&str] = &[
    "COALESCE", "NULLIF", "IFNULL", "CASE", "CAST", "SELECT", "INSERT", "UPDATE", "DELETE",
    "WHERE", "FROM", "CURRENT_TIMESTAMP", "CURRENT_DATE", "CURRENT_TIME",
];

/// Functions recognized in `NAME(` form inside text values.
const SQL_FUNCTIONS: &[&str] = &[
    "COALESCE", "NULLIF", "IFNULL", "CAST", "NOW", "DATETIME", "STRFTIME", "JULIANDAY", "SUM",
    "MAX", "MIN", "COUNT", "AVG", "ABS", "ROUND", "LOWER", "UPPER", "SUBSTR", "REPLACE", "TRIM",
];

/// Statement keyword paired with the clause keyword it needs.
const STATEMENT_SHAPES: &[(&str, &str)] = &[
    ("SELECT", "FROM"),
    ("INSERT", "INTO"),
    ("UPDATE", "SET"),
    ("DELETE", "FROM"),
];

const BARE_KEYWORDS: &[&str] = &["CURRENT_TIMESTAMP", "CURRENT_DATE", "CURRENT_TIME"];

/// Returns true if `text`, destined for a column of `kind` on `table`, reads
/// as a computed expression rather than a literal.
pub fn looks_like_expression(table: &TableSchema, kind: ColumnKind, text: &str) -> bool {
    match kind {
        ColumnKind::Text => looks_like_sql_text(table, text),
        other => !parses_as_literal(other, text) && has_expression_markers(text),
    }
}

fn has_expression_markers(text: &str) -> bool {
    text.contains(['(', ')', '+', '-', '*', '/'])
        || words(text).any(|(w, _)| contains_ignore_case(EXPRESSION_KEYWORDS, w))
}

fn looks_like_sql_text(table: &TableSchema, text: &str) -> bool {
    let trimmed = text.trim();

    if contains_ignore_case(BARE_KEYWORDS, trimmed) || trimmed.contains("||") {
        return true;
    }

    let tokens: Vec<(&str, usize)> = words(trimmed).collect();

    let calls_function = tokens.iter().any(|&(w, end)| {
        contains_ignore_case(SQL_FUNCTIONS, w) && trimmed[end..].trim_start().starts_with('(')
    });
    if calls_function {
        return true;
    }

    let has = |kw: &str| tokens.iter().any(|(w, _)| w.eq_ignore_ascii_case(kw));
    if STATEMENT_SHAPES.iter().any(|(stmt, clause)| has(stmt) && has(clause)) {
        return true;
    }

    column_arithmetic(table, trimmed)
}

/// `column <op> operand`, where operand is a number or another column.
fn column_arithmetic(table: &TableSchema, text: &str) -> bool {
    let Some((first, end)) = words(text).next() else {
        return false;
    };
    if !table.declares(first) || text[..end].trim() != first {
        return false;
    }

    let rest = text[end..].trim_start();
    let Some(rest) = rest.strip_prefix(['+', '-', '*', '/']) else {
        return false;
    };
    let operand = rest.trim();
    !operand.is_empty() && (parse_finite(operand).is_some() || table.declares(operand))
}

/// Identifier-like words with the byte offset just past each one.
fn words(text: &str) -> impl Iterator<Item = (&str, usize)> {
    let is_word = |c: char| c.is_ascii_alphanumeric() || c == '_';
    let mut rest = 0usize;
    std::iter::from_fn(move || {
        let tail = &text[rest..];
        let start = rest + tail.find(is_word)?;
        let len = text[start..]
            .find(|c: char| !is_word(c))
            .unwrap_or(text.len() - start);
        rest = start + len;
        Some((&text[start..rest], rest))
    })
}

fn contains_ignore_case(list: &[&str], word: &str) -> bool {
    list.iter().any(|k| k.eq_ignore_ascii_case(word))
}

// =============================================================================
// Unit Tests
// =============================================================================
