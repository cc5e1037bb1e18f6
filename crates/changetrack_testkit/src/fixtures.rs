//! Change and response fixtures.

use bytes::Bytes;
use changetrack_engine::BackoffConfig;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};
use std::io::Write;
use std::sync::Once;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// A change entry with one revision.
pub fn change(seq: impl Into<Value>, id: &str) -> Value {
    json!({
        "seq": seq.into(),
        "id": id,
        "changes": [{"rev": "1-7a3e"}],
    })
}

/// A deletion entry.
pub fn deleted_change(seq: impl Into<Value>, id: &str) -> Value {
    json!({
        "seq": seq.into(),
        "id": id,
        "deleted": true,
        "changes": [{"rev": "2-c41f"}],
    })
}

/// An entry the dispatcher must refuse: it has no `seq`.
pub fn change_without_seq(id: &str) -> Value {
    json!({
        "id": id,
        "changes": [{"rev": "1-7a3e"}],
    })
}

/// A long-poll response body.
pub fn longpoll_body(results: &[Value], last_seq: impl Into<Value>) -> Bytes {
    let body = json!({
        "results": results,
        "last_seq": last_seq.into(),
    });
    Bytes::from(body.to_string())
}

/// A one-shot (`feed=normal`) response body: a bare array of changes.
pub fn normal_body(results: &[Value]) -> Bytes {
    Bytes::from(Value::from(results.to_vec()).to_string())
}

/// Gzip-compresses a payload the way a streaming server does.
pub fn gzip(payload: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload).expect("Failed to compress");
    encoder.finish().expect("Failed to finish gzip stream")
}

/// A backoff short enough for tests.
pub fn fast_backoff() -> BackoffConfig {
    BackoffConfig::new(Duration::from_millis(5), Duration::from_millis(40))
}

/// Installs a tracing subscriber honouring `RUST_LOG`, once per process.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
