//! Polling response bodies.

use crate::error::{ProtocolError, ProtocolResult};
use serde_json::Value;

fn parse_json(body: &[u8]) -> ProtocolResult<Value> {
    serde_json::from_slice(body).map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
}

fn take_results(value: Value) -> ProtocolResult<Vec<Value>> {
    let Value::Object(mut fields) = value else {
        return Err(ProtocolError::MalformedPayload(
            "expected a JSON object".into(),
        ));
    };
    match fields.remove("results") {
        Some(Value::Array(results)) => Ok(results),
        Some(_) => Err(ProtocolError::MalformedPayload(
            "`results` is not an array".into(),
        )),
        None => Err(ProtocolError::MalformedPayload("missing `results`".into())),
    }
}

/// Parses a long-poll response: `{"results": [...], "last_seq": ...}`.
pub fn parse_longpoll_body(body: &[u8]) -> ProtocolResult<Vec<Value>> {
    take_results(parse_json(body)?)
}

/// Parses a one-shot (`feed=normal`) response.
///
/// Accepts a bare array of changes as well as the `{"results": [...]}`
/// envelope.
pub fn parse_normal_body(body: &[u8]) -> ProtocolResult<Vec<Value>> {
    match parse_json(body)? {
        Value::Array(changes) => Ok(changes),
        other => take_results(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn longpoll_results() {
        let body = br#"{"results":[{"seq":1,"id":"a"},{"seq":2,"id":"b"}],"last_seq":2}"#;
        let results = parse_longpoll_body(body).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["id"], json!("a"));
    }

    #[test]
    fn longpoll_requires_results() {
        assert!(parse_longpoll_body(br#"{"last_seq":2}"#).is_err());
        assert!(parse_longpoll_body(br#"{"results":{}}"#).is_err());
        assert!(parse_longpoll_body(br#"[{"seq":1}]"#).is_err());
        assert!(parse_longpoll_body(b"<html>").is_err());
    }

    #[test]
    fn normal_accepts_array_and_envelope() {
        let array = parse_normal_body(br#"[{"seq":1},{"id":"x"}]"#).unwrap();
        assert_eq!(array.len(), 2);

        let envelope = parse_normal_body(br#"{"results":[{"seq":1}],"last_seq":1}"#).unwrap();
        assert_eq!(envelope, vec![json!({"seq": 1})]);

        assert!(parse_normal_body(b"17").is_err());
    }
}
