//! Opaque sequence tokens used as feed checkpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A server-defined sequence token identifying a position in a changes feed.
///
/// Servers use plain integers, strings (`"12:345"`) or arrays; the tracker
/// never interprets the token, it only echoes it back as `since`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceId(Value);

impl SequenceId {
    /// Wraps a JSON value, rejecting `null`.
    pub fn from_value(value: Value) -> Option<Self> {
        if value.is_null() {
            None
        } else {
            Some(Self(value))
        }
    }

    /// Returns the underlying JSON value.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Consumes the token and returns the JSON value.
    pub fn into_value(self) -> Value {
        self.0
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(s) => f.write_str(s),
            other => write!(f, "{other}"),
        }
    }
}

impl From<u64> for SequenceId {
    fn from(seq: u64) -> Self {
        Self(Value::from(seq))
    }
}

impl From<&str> for SequenceId {
    fn from(seq: &str) -> Self {
        Self(Value::from(seq))
    }
}

impl From<String> for SequenceId {
    fn from(seq: String) -> Self {
        Self(Value::from(seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_is_not_a_sequence() {
        assert!(SequenceId::from_value(Value::Null).is_none());
        assert!(SequenceId::from_value(json!(0)).is_some());
    }

    #[test]
    fn display_forms() {
        assert_eq!(SequenceId::from(42).to_string(), "42");
        assert_eq!(SequenceId::from("12:345").to_string(), "12:345");

        let array = SequenceId::from_value(json!([3, "g1AAAA"])).unwrap();
        assert_eq!(array.to_string(), r#"[3,"g1AAAA"]"#);
    }

    #[test]
    fn serializes_transparently() {
        let seq = SequenceId::from(7);
        assert_eq!(serde_json::to_string(&seq).unwrap(), "7");

        let back: SequenceId = serde_json::from_str(r#""7-abc""#).unwrap();
        assert_eq!(back, SequenceId::from("7-abc"));
    }
}
