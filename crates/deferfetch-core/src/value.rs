//! Dynamic column values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// A dynamically-typed column value.
///
/// Rows handed to the result pipeline and rows returned by secondary loads
/// carry their data as `Value`s; primary-key components are `Value`s too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    BigInt(i64),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
    /// 16 raw bytes.
    Uuid([u8; 16]),
    Json(serde_json::Value),
}

impl Value {
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// SQL-ish name of the variant, used in error messages.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::Int(_) | Value::BigInt(_) => "INTEGER",
            Value::Double(_) => "DOUBLE",
            Value::Text(_) => "TEXT",
            Value::Bytes(_) => "BLOB",
            Value::Uuid(_) => "UUID",
            Value::Json(_) => "JSON",
        }
    }

    /// Whether this value may be used as a primary-key component.
    ///
    /// NULL, floating point and JSON values have no stable identity and are
    /// rejected when building an `EntityKey`.
    pub const fn is_key_component(&self) -> bool {
        !matches!(self, Value::Null | Value::Double(_) | Value::Json(_))
    }

    /// Integer view, widening `Int` and accepting booleans as 0/1.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int(v) => Some(v.into()),
            Value::BigInt(v) => Some(v),
            Value::Bool(v) => Some(v.into()),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Normalize integer widths so `Int(1)` and `BigInt(1)` address the same row.
    pub(crate) fn normalized(&self) -> Value {
        match *self {
            Value::Int(v) => Value::BigInt(v.into()),
            _ => self.clone(),
        }
    }

    /// Hash discriminant; both integer widths share one.
    const fn tag(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::BigInt(_) => 2,
            Value::Double(_) => 3,
            Value::Text(_) => 4,
            Value::Bytes(_) => 5,
            Value::Uuid(_) => 6,
            Value::Json(_) => 7,
        }
    }
}

/// Feed a single value into a hasher, consistent with key equality after
/// [`Value::normalized`].
pub(crate) fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    value.tag().hash(state);
    match value {
        Value::Null => {}
        Value::Bool(b) => b.hash(state),
        Value::Int(_) | Value::BigInt(_) => value.as_i64().hash(state),
        Value::Double(d) => d.to_bits().hash(state),
        Value::Text(s) => s.hash(state),
        Value::Bytes(b) => b.hash(state),
        Value::Uuid(u) => u.hash(state),
        Value::Json(j) => j.to_string().hash(state),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::BigInt(i) => write!(f, "{i}"),
            Value::Double(d) => write!(f, "{d}"),
            Value::Text(s) => write!(f, "'{s}'"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Uuid(u) => u.iter().try_for_each(|byte| write!(f, "{byte:02x}")),
            Value::Json(j) => write!(f, "{j}"),
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i32 => Int,
    i64 => BigInt,
    f64 => Double,
    String => Text,
    Vec<u8> => Bytes,
    [u8; 16] => Uuid,
    serde_json::Value => Json,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
