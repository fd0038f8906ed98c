use rusqlite::types::{ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Values that can be stored in a row or bound as a statement parameter.
///
/// The variants mirror the `SQLite` storage classes, so a value read back from the
/// database is always one of these five shapes:
/// ```rust
/// use sql_queue::prelude::*;
///
/// let params = vec![
///     Value::Int(1),
///     Value::Text("alice".into()),
///     Value::Null,
/// ];
/// # let _ = params;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Binary data
    Blob(Vec<u8>),
}

impl Value {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<&i64> {
        if let Value::Int(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let Value::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        if let Value::Float(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let Value::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Blob(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl From<rusqlite::types::Value> for Value {
    fn from(value: rusqlite::types::Value) -> Self {
        match value {
            rusqlite::types::Value::Null => Value::Null,
            rusqlite::types::Value::Integer(i) => Value::Int(i),
            rusqlite::types::Value::Real(f) => Value::Float(f),
            rusqlite::types::Value::Text(s) => Value::Text(s),
            rusqlite::types::Value::Blob(b) => Value::Blob(b),
        }
    }
}

impl rusqlite::ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let borrowed = match self {
            Value::Null => ValueRef::Null,
            Value::Int(i) => ValueRef::Integer(*i),
            Value::Float(f) => ValueRef::Real(*f),
            Value::Text(s) => ValueRef::Text(s.as_bytes()),
            Value::Blob(b) => ValueRef::Blob(b),
        };
        Ok(ToSqlOutput::Borrowed(borrowed))
    }
}

/// One entry of the parameter list a caller submits with a statement.
///
/// A flat list of [`Param::Value`] binds one statement once; a list of [`Param::Row`]
/// runs the statement once per row. Mixing the two is rejected before the request is
/// queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Param {
    Value(Value),
    Row(Vec<Value>),
}

impl From<Value> for Param {
    fn from(value: Value) -> Self {
        Param::Value(value)
    }
}

impl From<Vec<Value>> for Param {
    fn from(row: Vec<Value>) -> Self {
        Param::Row(row)
    }
}

/// Build a flat parameter list, one [`Param::Value`] per item.
#[must_use]
pub fn params<I, T>(values: I) -> Vec<Param>
where
    I: IntoIterator<Item = T>,
    T: Into<Value>,
{
    values.into_iter().map(|v| Param::Value(v.into())).collect()
}

/// Build a batch parameter list, one [`Param::Row`] per inner list.
#[must_use]
pub fn batch<I, R, T>(rows: I) -> Vec<Param>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator<Item = T>,
    T: Into<Value>,
{
    rows.into_iter()
        .map(|row| Param::Row(row.into_iter().map(Into::into).collect()))
        .collect()
}
