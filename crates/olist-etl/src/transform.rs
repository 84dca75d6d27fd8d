//! Record transformer
//!
//! Maps a [`RawRecord`] onto a table's field list. Payload fields are lenient
//! (blank or unparsable input becomes NULL, or the field's default); key and
//! foreign-key fields are strict and reject the whole record.

use serde::Serialize;
use std::fmt;

use crate::source::{Header, RawRecord};
use crate::tables::{FieldSpec, TableSpec};
use crate::value::{FieldKind, TypedRow, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    MissingKey,
    InvalidType,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::MissingKey => write!(f, "missing_key"),
            RejectReason::InvalidType => write!(f, "invalid_type"),
        }
    }
}

/// Why a record was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejected {
    pub reason: RejectReason,
    pub column: &'static str,
}

pub struct Transformer<'a> {
    table: &'a TableSpec,
}

impl<'a> Transformer<'a> {
    pub fn new(table: &'a TableSpec) -> Self {
        Self { table }
    }

    /// Mapped source columns absent from `header`. Those fields will be
    /// NULL on every row (or reject every row, for key fields).
    pub fn missing_columns(&self, header: &Header) -> Vec<&'static str> {
        self.table
            .fields
            .iter()
            .filter(|f| !header.contains(f.source))
            .map(|f| f.source)
            .collect()
    }

    pub fn transform(&self, record: &RawRecord) -> Result<TypedRow, Rejected> {
        self.table
            .fields
            .iter()
            .map(|field| coerce(field, record.get(field.source)))
            .collect::<Result<Vec<_>, _>>()
            .map(TypedRow::new)
    }
}

fn coerce(field: &FieldSpec, raw: Option<&str>) -> Result<Value, Rejected> {
    let reject = |reason| Rejected {
        reason,
        column: field.column,
    };

    let text = match raw.map(str::trim) {
        Some(text) if !text.is_empty() => text,
        _ if field.role.is_required() => return Err(reject(RejectReason::MissingKey)),
        _ => return Ok(fallback(field)),
    };

    let value = match field.kind {
        FieldKind::Integer => text.parse::<i64>().ok().map(Value::Integer),
        FieldKind::Float => text
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Value::Float),
        FieldKind::Text => Some(Value::Text(text.to_string())),
        FieldKind::Timestamp => Some(Value::Timestamp(text.to_string())),
    };

    match value {
        Some(value) => Ok(value),
        None if field.role.is_required() => Err(reject(RejectReason::InvalidType)),
        None => Ok(fallback(field)),
    }
}

fn fallback(field: &FieldSpec) -> Value {
    field.default.map_or(Value::Null, |d| d.to_value())
}
