//! Typed values and rows produced by the transformer

use serde::Serialize;
use std::fmt;

/// Declared type of a destination column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Integer,
    Float,
    Text,
    /// Opaque date/time string; parsing is left to the database.
    Timestamp,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Integer => write!(f, "integer"),
            FieldKind::Float => write!(f, "float"),
            FieldKind::Text => write!(f, "text"),
            FieldKind::Timestamp => write!(f, "timestamp"),
        }
    }
}

/// A single coerced cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Timestamp(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Timestamp(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) | Value::Timestamp(s) => write!(f, "{:?}", s),
        }
    }
}

/// One destination row, positioned to match the table's column list.
///
/// Rows are immutable once built; the resolver produces a new row with the
/// surrogate key appended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TypedRow(Vec<Value>);

impl TypedRow {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume the row and return it with `value` appended.
    pub fn with_appended(mut self, value: Value) -> Self {
        self.0.push(value);
        self
    }
}

impl fmt::Display for TypedRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, ")")
    }
}
