use std::fmt;

/// A single decoded datum.
///
/// Every decoder in this crate produces `Value` objects; no other
/// representation of a decoded datum exists. A `Value` is immutable once
/// constructed and compares by its wrapped content.
///
/// There is no implicit coercion between variants. Callers must check the
/// active variant through the `as_*` accessors before interpreting a value.
///
/// # Examples
///
/// ```rust
/// use luxtronik::Value;
///
/// let value = Value::from(48.5);
/// assert_eq!(Some(48.5), value.as_f64());
/// assert_eq!(None, value.as_bool());
/// ```
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// A numeric value.
    Number(f64),
    /// A boolean value.
    Bool(bool),
    /// A textual value.
    Str(String),
    /// A sequence of boolean values.
    BoolArray(Vec<bool>),
}

impl Value {
    /// Return the wrapped number, if this is a `Number` value.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Number(value) => Some(value),
            _ => None,
        }
    }

    /// Return the wrapped boolean, if this is a `Bool` value.
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(value) => Some(value),
            _ => None,
        }
    }

    /// Return the wrapped string, if this is a `Str` value.
    pub fn as_str(&self) -> Option<&str> {
        match *self {
            Value::Str(ref value) => Some(value),
            _ => None,
        }
    }

    /// Return the wrapped boolean sequence, if this is a `BoolArray` value.
    pub fn as_bools(&self) -> Option<&[bool]> {
        match *self {
            Value::BoolArray(ref values) => Some(values),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Value::Number(value) => write!(f, "{}", value),
            Value::Bool(value) => write!(f, "{}", value),
            Value::Str(ref value) => write!(f, "{}", value),
            Value::BoolArray(ref values) => write!(f, "{:?}", values),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Value {
        Value::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Value {
        Value::Number(f64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Value {
        Value::Number(value as f64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Value {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Value {
        Value::Str(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Value {
        Value::Str(value)
    }
}

impl From<Vec<bool>> for Value {
    fn from(values: Vec<bool>) -> Value {
        Value::BoolArray(values)
    }
}
