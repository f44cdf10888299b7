//! Attribute values as they cross the marshaling boundary.

use chrono::NaiveDateTime;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// One typed value of one named attribute of one entity instance.
///
/// The semantic type is declared by the owning [`EntityType`](crate::models::EntityType)
/// and is immutable for the lifetime of the value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Null,
    Integer(i64),
    Text(String),
    Symbol(String),
    Timestamp(NaiveDateTime),
    Document(JsonValue),
    ReferenceArray(Vec<AttributeValue>),
}

/// One record's attributes, keyed by attribute name.
///
/// A `BTreeMap` so that statement construction iterates columns in a
/// deterministic order.
pub type AttributeMap = BTreeMap<String, AttributeValue>;

impl AttributeValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Key rendering for error messages. Primary keys are scalars; anything
    /// else falls back to its debug form.
    pub fn display_key(&self) -> String {
        match self {
            Self::Integer(v) => v.to_string(),
            Self::Text(s) | Self::Symbol(s) => s.clone(),
            other => format!("{:?}", other),
        }
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for AttributeValue {
    fn from(v: i32) -> Self {
        Self::Integer(v.into())
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<NaiveDateTime> for AttributeValue {
    fn from(v: NaiveDateTime) -> Self {
        Self::Timestamp(v)
    }
}

impl From<JsonValue> for AttributeValue {
    fn from(v: JsonValue) -> Self {
        Self::Document(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_key_scalars() {
        assert_eq!(AttributeValue::Integer(42).display_key(), "42");
        assert_eq!(AttributeValue::Text("abc".into()).display_key(), "abc");
        assert_eq!(AttributeValue::Symbol("foo".into()).display_key(), "foo");
    }

    #[test]
    fn test_is_null() {
        assert!(AttributeValue::Null.is_null());
        assert!(!AttributeValue::Integer(0).is_null());
    }
}
