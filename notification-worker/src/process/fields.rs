//! Field-level helpers shared by the auth and order decoders.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DecodeError;

/// A template value passed through to rendering untouched.
///
/// Producers send amounts and day counts as either strings or numbers, so
/// the decoder accepts any JSON scalar and keeps its original form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Text(String),
    Number(serde_json::Number),
    Flag(bool),
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Text(s.to_string())
    }
}

impl From<u64> for Scalar {
    fn from(n: u64) -> Self {
        Scalar::Number(n.into())
    }
}

/// Parse a payload into a JSON object.
pub(crate) fn parse_object(payload: &[u8]) -> Result<Map<String, Value>, DecodeError> {
    match serde_json::from_slice::<Value>(payload)? {
        Value::Object(map) => Ok(map),
        _ => Err(DecodeError::NotAnObject),
    }
}

/// Check that `name` is present as a non-blank string.
pub(crate) fn require_str(map: &Map<String, Value>, name: &'static str) -> Result<(), DecodeError> {
    match map.get(name) {
        None | Some(Value::Null) => Err(DecodeError::MissingField(name)),
        Some(Value::String(s)) if s.trim().is_empty() => Err(DecodeError::MissingField(name)),
        Some(Value::String(_)) => Ok(()),
        Some(_) => Err(DecodeError::InvalidField(name)),
    }
}
