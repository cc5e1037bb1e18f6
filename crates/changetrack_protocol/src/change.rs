//! Change records emitted by a remote changes feed.

use crate::sequence::SequenceId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single entry from a changes feed.
///
/// A record is a JSON object carrying at least a `seq` token and, in practice,
/// the document `id` and a `changes` list of revisions. Every other field is
/// passed through to the client untouched.
///
/// ```json
/// {"seq": 12, "id": "doc1", "changes": [{"rev": "3-abc"}], "deleted": true}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeRecord(Map<String, Value>);

impl ChangeRecord {
    /// Wraps a JSON object.
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Converts a JSON value into a record, returning `None` for non-objects.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self(fields)),
            _ => None,
        }
    }

    /// Returns the sequence token, if present and non-null.
    pub fn sequence(&self) -> Option<SequenceId> {
        self.0.get("seq").cloned().and_then(SequenceId::from_value)
    }

    /// Returns the document ID.
    pub fn doc_id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str)
    }

    /// Returns true if the change is a deletion.
    pub fn is_deleted(&self) -> bool {
        self.0
            .get("deleted")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Returns the revision IDs listed under `changes`.
    pub fn revisions(&self) -> Vec<&str> {
        self.0
            .get("changes")
            .and_then(Value::as_array)
            .map(|changes| {
                changes
                    .iter()
                    .filter_map(|c| c.get("rev").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns an arbitrary field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns the underlying JSON object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consumes the record and returns the JSON object.
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}
