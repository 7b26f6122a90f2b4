//! Conversions between rusqlite's value types and ours.

use gentab_error::{GentabError, Result};
use gentab_types::{HostValue, SqliteValue, to_native};
use rusqlite::types::{Value, ValueRef};

pub(crate) fn from_value_ref(value: ValueRef<'_>) -> SqliteValue {
    match value {
        ValueRef::Null => SqliteValue::Null,
        ValueRef::Integer(i) => SqliteValue::Integer(i),
        ValueRef::Real(f) => SqliteValue::Float(f),
        ValueRef::Text(bytes) => SqliteValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => SqliteValue::Blob(bytes.to_vec()),
    }
}

pub(crate) fn to_engine_value(value: SqliteValue) -> Value {
    match value {
        SqliteValue::Null => Value::Null,
        SqliteValue::Integer(i) => Value::Integer(i),
        SqliteValue::Float(f) => Value::Real(f),
        SqliteValue::Text(s) => Value::Text(s),
        SqliteValue::Blob(b) => Value::Blob(b),
    }
}

/// Convert statement parameters; indexes in errors are 1-based.
pub(crate) fn bind_values(params: &[HostValue]) -> Result<Vec<Value>> {
    params
        .iter()
        .enumerate()
        .map(|(i, param)| {
            to_native(param)
                .map(to_engine_value)
                .map_err(|source| GentabError::BindValue { index: i + 1, source })
        })
        .collect()
}
