//! Changes-feed address construction.
//!
//! Polling transports put every option in the query string:
//!
//! ```text
//! _changes?feed=longpoll&limit=50&heartbeat=300000&since=42&filter=app%2Fby_channel&channel=news
//! ```
//!
//! The websocket transport opens `_changes?feed=websocket` and sends the same
//! options as a JSON object once connected, because the upgrade request is a
//! GET and cannot carry a body.

use crate::error::{ProtocolError, ProtocolResult};
use crate::options::{FeedMode, FeedOptions};
use crate::sequence::SequenceId;
use serde_json::{Map, Value};
use url::{form_urlencoded, Url};

fn encode(component: &str) -> String {
    form_urlencoded::byte_serialize(component.as_bytes()).collect()
}

fn param_text(key: &str, value: &Value) -> ProtocolResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => serde_json::to_string(other).map_err(|e| ProtocolError::FilterParam {
            key: key.to_string(),
            message: e.to_string(),
        }),
    }
}

fn join_path(base: &Url, path: &str) -> ProtocolResult<Url> {
    let mut joined = base.as_str().to_string();
    if !joined.ends_with('/') {
        joined.push('/');
    }
    joined.push_str(path);
    Url::parse(&joined).map_err(|e| ProtocolError::InvalidAddress(format!("{joined}: {e}")))
}

/// Parses and validates a remote database address.
///
/// Only absolute `http` and `https` addresses are accepted.
pub fn parse_remote(remote: &str) -> ProtocolResult<Url> {
    let url = Url::parse(remote)
        .map_err(|e| ProtocolError::InvalidAddress(format!("{}: {e}", mask_credentials(remote))))?;

    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(url),
        scheme => Err(ProtocolError::InvalidAddress(format!(
            "unsupported remote {} (scheme {scheme:?})",
            mask_credentials(remote)
        ))),
    }
}

/// Builds the feed path (relative to the database URL) for a polling request.
pub fn changes_feed_path(
    mode: FeedMode,
    options: &FeedOptions,
    since: Option<&SequenceId>,
) -> ProtocolResult<String> {
    let mut path = format!(
        "_changes?feed={}&heartbeat={}",
        mode.feed_token(),
        options.heartbeat_millis()
    );

    if let Some(since) = since {
        path.push_str("&since=");
        path.push_str(&encode(&since.to_string()));
    }

    if let Some(filter) = options.effective_filter() {
        path.push_str("&filter=");
        path.push_str(&encode(&filter.name));
        for (key, value) in &filter.params {
            let value = param_text(key, value)?;
            path.push('&');
            path.push_str(&encode(key));
            path.push('=');
            path.push_str(&encode(&value));
        }
    }

    Ok(path)
}

/// Builds the absolute feed URL for a polling request.
pub fn changes_feed_url(
    base: &Url,
    mode: FeedMode,
    options: &FeedOptions,
    since: Option<&SequenceId>,
) -> ProtocolResult<Url> {
    let path = changes_feed_path(mode, options, since)?;
    join_path(base, &path)
}

/// Builds the websocket feed URL: `ws`/`wss` scheme, fixed
/// `_changes?feed=websocket` path, no other options.
pub fn websocket_feed_url(base: &Url) -> ProtocolResult<Url> {
    let scheme = match base.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(ProtocolError::InvalidAddress(format!(
                "cannot derive a websocket address from scheme {other:?}"
            )))
        }
    };

    let rest = &base.as_str()[base.scheme().len()..];
    let rewritten = Url::parse(&format!("{scheme}{rest}"))
        .map_err(|e| ProtocolError::InvalidAddress(e.to_string()))?;
    join_path(&rewritten, "_changes?feed=websocket")
}

/// Builds the options message sent as the first websocket frame.
///
/// Filter parameters keep their native JSON types here; only the query-string
/// form needs them stringified.
pub fn websocket_options_payload(
    options: &FeedOptions,
    since: Option<&SequenceId>,
) -> ProtocolResult<Vec<u8>> {
    let mut body = Map::new();
    body.insert("feed".into(), Value::from("websocket"));
    body.insert(
        "heartbeat".into(),
        Value::from(u64::try_from(options.heartbeat_millis()).unwrap_or(u64::MAX)),
    );
    if let Some(since) = since {
        body.insert("since".into(), since.as_value().clone());
    }
    if let Some(filter) = options.effective_filter() {
        body.insert("filter".into(), Value::from(filter.name));
        for (key, value) in filter.params {
            body.insert(key, value);
        }
    }

    serde_json::to_vec(&Value::Object(body))
        .map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
}

/// Returns a copy of the URL without user-info.
pub fn strip_credentials(url: &Url) -> Url {
    let mut stripped = url.clone();
    // Only fails for cannot-be-a-base URLs, which never carry credentials.
    let _ = stripped.set_username("");
    let _ = stripped.set_password(None);
    stripped
}

/// Renders a remote address for logs with any credentials replaced by `---`.
pub fn mask_credentials(remote: &str) -> String {
    if let Ok(mut url) = Url::parse(remote) {
        if !url.username().is_empty() || url.password().is_some() {
            let _ = url.set_username("---");
            let _ = url.set_password(Some("---"));
        }
        return url.to_string();
    }

    // Unparseable input: mask anything between the scheme and an '@'.
    match (remote.find("://"), remote.rfind('@')) {
        (Some(start), Some(at)) if at > start + 3 => {
            format!("{}---:---{}", &remote[..start + 3], &remote[at..])
        }
        _ => remote.to_string(),
    }
}

/// Returns the database name, the last non-empty path segment of the remote.
pub fn database_name(url: &Url) -> Option<String> {
    url.path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()
        .map(str::to_string)
}
