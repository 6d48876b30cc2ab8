//! Numbers that exchanges send either as JSON strings or JSON numbers.

use serde_json::Value;
use thiserror::Error;

/// Failure to read a flexible numeric field.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NumberError {
    /// The string could not be parsed as a float.
    #[error("invalid numeric string {0:?}")]
    InvalidString(String),

    /// The JSON value is neither a string nor a number.
    #[error("expected string or number, got {0}")]
    WrongType(&'static str),
}

/// Parse a JSON value holding a number, quoted or not, into `f64`.
///
/// `"0.0009"` and `0.0009` produce the same value. `"NaN"` and the
/// infinities are rejected.
pub fn parse_flexible_f64(value: &Value) -> Result<f64, NumberError> {
    match value {
        Value::Number(n) => n.as_f64().ok_or(NumberError::WrongType("number")),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| NumberError::InvalidString(s.clone())),
        Value::Null => Err(NumberError::WrongType("null")),
        Value::Bool(_) => Err(NumberError::WrongType("bool")),
        Value::Array(_) => Err(NumberError::WrongType("array")),
        Value::Object(_) => Err(NumberError::WrongType("object")),
    }
}

/// Parse a JSON value holding a non-negative integer, quoted or not.
///
/// Used for exchange IDs and microsecond timestamps, which must not go
/// through `f64`.
pub fn parse_flexible_u64(value: &Value) -> Result<u64, NumberError> {
    match value {
        Value::Number(n) => n.as_u64().ok_or(NumberError::WrongType("non-integer number")),
        Value::String(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| NumberError::InvalidString(s.clone())),
        Value::Null => Err(NumberError::WrongType("null")),
        Value::Bool(_) => Err(NumberError::WrongType("bool")),
        Value::Array(_) => Err(NumberError::WrongType("array")),
        Value::Object(_) => Err(NumberError::WrongType("object")),
    }
}
