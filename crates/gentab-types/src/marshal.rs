//! Conversion between engine values and host values.
//!
//! `to_host` never fails. `to_native` fails for values the engine cannot
//! store; callers attach their own context (module name, parameter index)
//! to the returned [`MarshalError`].

use gentab_error::MarshalError;

use crate::host::{HostValue, IntegerMode};
use crate::value::SqliteValue;

/// Present an engine value to host code.
#[allow(clippy::cast_precision_loss)]
pub fn to_host(value: &SqliteValue, mode: IntegerMode) -> HostValue {
    match value {
        SqliteValue::Null => HostValue::Null,
        SqliteValue::Integer(i) => match mode {
            IntegerMode::Loose => HostValue::Number(*i as f64),
            IntegerMode::Strict => HostValue::BigInt(i128::from(*i)),
        },
        SqliteValue::Float(f) => HostValue::Number(*f),
        SqliteValue::Text(s) => HostValue::Text(s.clone()),
        SqliteValue::Blob(b) => HostValue::Blob(b.clone()),
    }
}

/// Convert a host value into something the engine can store.
///
/// `Missing` and `Null` both become NULL. Numbers always become REAL;
/// only `BigInt` produces an INTEGER.
pub fn to_native(value: &HostValue) -> Result<SqliteValue, MarshalError> {
    match value {
        HostValue::Missing | HostValue::Null => Ok(SqliteValue::Null),
        HostValue::Number(n) => Ok(SqliteValue::Float(*n)),
        HostValue::BigInt(i) => i64::try_from(*i)
            .map(SqliteValue::Integer)
            .map_err(|_| MarshalError::BigIntTooLarge),
        HostValue::Text(s) => Ok(SqliteValue::Text(s.clone())),
        HostValue::Blob(b) => Ok(SqliteValue::Blob(b.clone())),
        HostValue::Bool(_) => Err(MarshalError::InvalidValue { kind: value.kind() }),
    }
}
