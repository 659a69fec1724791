// Bound Values
// Values passed to statements and read back from result sets

use crate::db::error::DbalError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Display;

/// Format used when a timestamp is sent to the server as text
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A single bound or fetched value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(NaiveDateTime),
    Json(serde_json::Value),
}

impl Value {
    /// Text value built from anything with a string form
    pub fn display(value: impl Display) -> Self {
        Value::Text(value.to_string())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Timestamp(_) => "timestamp",
            Value::Json(serde_json::Value::Array(_)) => "array",
            Value::Json(serde_json::Value::Object(_)) => "object",
            Value::Json(_) => "json",
        }
    }

    /// Coerce into a value every driver can put on the wire.
    ///
    /// Timestamps become `YYYY-MM-DD HH:MM:SS` strings and JSON scalars are
    /// unwrapped. JSON arrays and objects have no scalar form.
    pub fn to_scalar(&self) -> Result<Value, DbalError> {
        match self {
            Value::Timestamp(ts) => Ok(Value::Text(ts.format(TIMESTAMP_FORMAT).to_string())),
            Value::Json(json) => match json {
                serde_json::Value::Null => Ok(Value::Null),
                serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
                serde_json::Value::Number(n) => Ok(n
                    .as_i64()
                    .map(Value::Int)
                    .unwrap_or_else(|| Value::Float(n.as_f64().unwrap_or(f64::NAN)))),
                serde_json::Value::String(s) => Ok(Value::Text(s.clone())),
                serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                    Err(DbalError::Cast(self.type_name().to_string()))
                }
            },
            other => Ok(other.clone()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }
}

macro_rules! impl_from_int {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::Int(i64::from(v))
            }
        })*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
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

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v.naive_utc())
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Text(v.format("%Y-%m-%d").to_string())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Values bound to one statement: either all positional or all named
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Params {
    Positional(Vec<Value>),
    Named(BTreeMap<String, Value>),
}

impl Params {
    pub fn positional<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Params::Positional(values.into_iter().map(Into::into).collect())
    }

    /// Named values; a leading `:` on a key is ignored
    pub fn named<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Params::Named(
            pairs
                .into_iter()
                .map(|(key, value)| {
                    let key = key.into();
                    let key = match key.strip_prefix(':') {
                        Some(stripped) => stripped.to_string(),
                        None => key,
                    };
                    (key, value.into())
                })
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        match self {
            Params::Positional(values) => values.len(),
            Params::Named(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_named(&self) -> bool {
        matches!(self, Params::Named(_))
    }
}

/// Build positional [`Params`](crate::Params) from a list of expressions
#[macro_export]
macro_rules! params {
    () => {
        $crate::Params::Positional(::std::vec::Vec::new())
    };
    ($($value:expr),+ $(,)?) => {
        $crate::Params::Positional(vec![$($crate::Value::from($value)),+])
    };
}

/// Build named [`Params`](crate::Params) from `name => value` pairs
#[macro_export]
macro_rules! named_params {
    () => {
        $crate::Params::Named(::std::collections::BTreeMap::new())
    };
    ($($name:expr => $value:expr),+ $(,)?) => {
        $crate::Params::named([$(($name, $crate::Value::from($value))),+])
    };
}
