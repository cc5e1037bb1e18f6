//! Streaming frame tagging and parsing.
//!
//! Each inbound websocket message is prefixed with a one-byte [`FrameKind`]
//! before it reaches [`parse_tagged_frame`], so the parser does not need to
//! know which transport produced the bytes.

use crate::error::{ProtocolError, ProtocolResult};
use flate2::read::GzDecoder;
use serde_json::Value;
use std::io::Read;

/// Classification of a streaming payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Unrecognized payload.
    Unknown = 0,
    /// Plain JSON text.
    Plaintext = 1,
    /// Gzip-compressed JSON.
    Gzip = 2,
    /// End of the catch-up backlog (`[]`).
    Eof = 3,
}

impl FrameKind {
    /// Classifies a received payload.
    pub fn classify(is_text: bool, payload: &[u8]) -> Self {
        if is_text {
            if payload == b"[]" {
                FrameKind::Eof
            } else {
                FrameKind::Plaintext
            }
        } else {
            FrameKind::Gzip
        }
    }

    /// Returns the tag byte.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Parses a tag byte.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            1 => FrameKind::Plaintext,
            2 => FrameKind::Gzip,
            3 => FrameKind::Eof,
            _ => FrameKind::Unknown,
        }
    }
}

/// What a single streaming frame means to the tracker.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameEvent {
    /// The server has sent everything that was pending; the feed is now live.
    CaughtUp,
    /// Raw change entries, in server order. Entries are validated by the
    /// dispatcher, not here.
    Changes(Vec<Value>),
}

/// Prepends the tag byte to a payload.
pub fn tag_frame(kind: FrameKind, payload: &[u8]) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(payload.len() + 1);
    buffer.push(kind.as_byte());
    buffer.extend_from_slice(payload);
    buffer
}

/// Parses a tagged frame produced by [`tag_frame`].
pub fn parse_tagged_frame(buffer: &[u8]) -> ProtocolResult<FrameEvent> {
    let (&tag, payload) = buffer
        .split_first()
        .ok_or_else(|| ProtocolError::Frame("empty frame".into()))?;

    match FrameKind::from_byte(tag) {
        FrameKind::Eof => Ok(FrameEvent::CaughtUp),
        FrameKind::Plaintext => parse_changes(payload),
        FrameKind::Gzip => {
            let mut inflated = Vec::new();
            GzDecoder::new(payload)
                .read_to_end(&mut inflated)
                .map_err(|e| ProtocolError::Frame(format!("gzip: {e}")))?;
            if inflated == b"[]" {
                return Ok(FrameEvent::CaughtUp);
            }
            parse_changes(&inflated)
        }
        FrameKind::Unknown => Err(ProtocolError::Frame(format!("unknown frame tag {tag}"))),
    }
}

fn parse_changes(json: &[u8]) -> ProtocolResult<FrameEvent> {
    let value: Value =
        serde_json::from_slice(json).map_err(|e| ProtocolError::Frame(e.to_string()))?;

    match value {
        Value::Array(changes) => Ok(FrameEvent::Changes(changes)),
        Value::Object(_) => Ok(FrameEvent::Changes(vec![value])),
        other => Err(ProtocolError::Frame(format!(
            "expected a change or a list of changes, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use serde_json::json;
    use std::io::Write;

    fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn classification() {
        assert_eq!(FrameKind::classify(true, b"[]"), FrameKind::Eof);
        assert_eq!(FrameKind::classify(true, b"[ ]"), FrameKind::Plaintext);
        assert_eq!(FrameKind::classify(true, br#"[{"seq":1}]"#), FrameKind::Plaintext);
        assert_eq!(FrameKind::classify(false, b"[]"), FrameKind::Gzip);
    }

    #[test]
    fn tag_bytes() {
        for kind in [
            FrameKind::Unknown,
            FrameKind::Plaintext,
            FrameKind::Gzip,
            FrameKind::Eof,
        ] {
            assert_eq!(FrameKind::from_byte(kind.as_byte()), kind);
        }
        assert_eq!(FrameKind::from_byte(200), FrameKind::Unknown);
        assert_eq!(tag_frame(FrameKind::Eof, b"[]"), vec![3, b'[', b']']);
    }

    #[test]
    fn eof_means_caught_up() {
        let frame = tag_frame(FrameKind::Eof, b"[]");
        assert_eq!(parse_tagged_frame(&frame).unwrap(), FrameEvent::CaughtUp);
    }

    #[test]
    fn plaintext_changes() {
        let frame = tag_frame(
            FrameKind::Plaintext,
            br#"[{"seq":1,"id":"a"},{"seq":2,"id":"b"}]"#,
        );
        let FrameEvent::Changes(changes) = parse_tagged_frame(&frame).unwrap() else {
            panic!("expected changes");
        };
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[1], json!({"seq": 2, "id": "b"}));
    }

    #[test]
    fn single_object_frame() {
        let frame = tag_frame(FrameKind::Plaintext, br#"{"seq":5,"id":"a"}"#);
        assert_eq!(
            parse_tagged_frame(&frame).unwrap(),
            FrameEvent::Changes(vec![json!({"seq": 5, "id": "a"})])
        );
    }

    #[test]
    fn gzip_changes() {
        let frame = tag_frame(FrameKind::Gzip, &gzip(br#"[{"seq":"3-x","id":"c"}]"#));
        assert_eq!(
            parse_tagged_frame(&frame).unwrap(),
            FrameEvent::Changes(vec![json!({"seq": "3-x", "id": "c"})])
        );

        let frame = tag_frame(FrameKind::Gzip, &gzip(b"[]"));
        assert_eq!(parse_tagged_frame(&frame).unwrap(), FrameEvent::CaughtUp);
    }

    #[test]
    fn undecodable_frames() {
        assert!(parse_tagged_frame(&[]).is_err());
        assert!(parse_tagged_frame(&tag_frame(FrameKind::Unknown, b"[]")).is_err());
        assert!(parse_tagged_frame(&tag_frame(FrameKind::Plaintext, b"{nope")).is_err());
        assert!(parse_tagged_frame(&tag_frame(FrameKind::Plaintext, b"42")).is_err());
        assert!(parse_tagged_frame(&tag_frame(FrameKind::Gzip, b"not gzip")).is_err());
    }
}
