//! Typed attribute values.
//!
//! Raw storage is always a string; `value_type` selects the decode function.
//! Encoding and decoding are one function per variant, and decode failure is
//! an explicit `None`. The degrade-to-raw-string policy lives at the store
//! boundary, not in here.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Storage tag for an attribute value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueType {
    Str,
    Num,
    Bool,
    Json,
}

impl ValueType {
    /// Convert from database string representation. Unknown tags read as
    /// plain strings so old rows never become unreadable.
    pub fn from_db_str(s: &str) -> Self {
        match s {
            "string" => ValueType::Str,
            "number" => ValueType::Num,
            "boolean" => ValueType::Bool,
            "json" => ValueType::Json,
            _ => ValueType::Str,
        }
    }

    /// Convert to database string representation.
    pub fn to_db_str(self) -> &'static str {
        match self {
            ValueType::Str => "string",
            ValueType::Num => "number",
            ValueType::Bool => "boolean",
            ValueType::Json => "json",
        }
    }
}

/// A dynamic attribute value. The variant, not the runtime shape of some
/// loosely-typed input, decides how the value is stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Num(f64),
    Str(String),
    Json(JsonValue),
}

impl AttributeValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            AttributeValue::Str(_) => ValueType::Str,
            AttributeValue::Num(_) => ValueType::Num,
            AttributeValue::Bool(_) => ValueType::Bool,
            AttributeValue::Json(_) => ValueType::Json,
        }
    }

    /// Serialize to the raw stored string.
    pub fn encode(&self) -> String {
        match self {
            AttributeValue::Str(s) => s.clone(),
            AttributeValue::Num(n) => crate::filter::format_number(*n),
            AttributeValue::Bool(b) => b.to_string(),
            // Serializing an in-memory JSON value cannot fail.
            AttributeValue::Json(v) => v.to_string(),
        }
    }

    /// Decode a raw stored string per its type tag. Returns `None` when the
    /// payload does not parse as the tagged type.
    pub fn decode(raw: &str, value_type: ValueType) -> Option<Self> {
        match value_type {
            ValueType::Str => Some(AttributeValue::Str(raw.to_string())),
            ValueType::Num => raw.parse::<f64>().ok().map(AttributeValue::Num),
            ValueType::Bool => match raw {
                "true" => Some(AttributeValue::Bool(true)),
                "false" => Some(AttributeValue::Bool(false)),
                _ => None,
            },
            ValueType::Json => serde_json::from_str(raw).ok().map(AttributeValue::Json),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::Str(s.to_string())
    }
}

impl From<f64> for AttributeValue {
    fn from(n: f64) -> Self {
        AttributeValue::Num(n)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Bool(b)
    }
}
