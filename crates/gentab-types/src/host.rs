use std::fmt;

use serde::{Deserialize, Serialize};

/// A value as seen by host callbacks.
///
/// Integers surface either as [`HostValue::Number`] or [`HostValue::BigInt`]
/// depending on the [`IntegerMode`] in effect. [`HostValue::Missing`] is the
/// sentinel passed to generators for parameters the query left unbound.
#[derive(Clone, Debug, PartialEq)]
pub enum HostValue {
    /// No value was supplied.
    Missing,
    Null,
    Bool(bool),
    /// A double-precision number.
    Number(f64),
    /// An integer that must not lose precision.
    BigInt(i128),
    Text(String),
    Blob(Vec<u8>),
}

impl HostValue {
    pub const fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    /// True for both `Null` and `Missing`.
    pub const fn is_nullish(&self) -> bool {
        matches!(self, Self::Null | Self::Missing)
    }

    /// The value as a lossless `i64`, from either numeric representation.
    #[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::BigInt(i) => i64::try_from(*i).ok(),
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 => {
                Some(*n as i64)
            }
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Blob(b) => Some(b),
            _ => None,
        }
    }

    /// Short name of the variant, used in diagnostics.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::BigInt(_) => "bigint",
            Self::Text(_) => "string",
            Self::Blob(_) => "blob",
        }
    }
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::BigInt(i) => write!(f, "{i}n"),
            Self::Text(s) => write!(f, "{s:?}"),
            Self::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for HostValue {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<i64> for HostValue {
    fn from(n: i64) -> Self {
        Self::BigInt(i128::from(n))
    }
}

impl From<i128> for HostValue {
    fn from(n: i128) -> Self {
        Self::BigInt(n)
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<Vec<u8>> for HostValue {
    fn from(b: Vec<u8>) -> Self {
        Self::Blob(b)
    }
}

impl<T: Into<Self>> From<Option<T>> for HostValue {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Self::Null, Into::into)
    }
}

/// How engine integers are presented to host code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegerMode {
    /// Integers become [`HostValue::Number`]; values beyond 2^53 lose precision.
    #[default]
    Loose,
    /// Integers become [`HostValue::BigInt`].
    Strict,
}

impl IntegerMode {
    /// Resolve a per-table or per-statement override against a default.
    pub fn resolve(overridden: Option<Self>, default: Self) -> Self {
        overridden.unwrap_or(default)
    }
}
