//! Feed modes and the filter options shared by every transport.

use crate::error::{ProtocolError, ProtocolResult};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Heartbeat requested from the server when none is configured.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_millis(300_000);

/// Maximum number of changes requested per long-poll.
pub const LONGPOLL_LIMIT: u32 = 50;

/// Name of the built-in filter that restricts a feed to a set of documents.
pub const DOC_IDS_FILTER: &str = "_doc_ids";

/// Option names owned by the tracker. Filter parameters with these names are
/// never sent.
pub const RESERVED_OPTION_KEYS: [&str; 4] = ["feed", "heartbeat", "since", "filter"];

/// How the polling transport asks the server for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedMode {
    /// A single request returning everything since the checkpoint.
    OneShot,
    /// Repeated requests that block until at least one change is available.
    LongPoll,
    /// A single unbounded response that keeps emitting changes.
    Continuous,
}

impl FeedMode {
    /// Returns the `feed=` token for this mode, including any mode-specific
    /// parameters that follow it.
    pub fn feed_token(&self) -> String {
        match self {
            FeedMode::OneShot => "normal".to_string(),
            FeedMode::LongPoll => format!("longpoll&limit={LONGPOLL_LIMIT}"),
            FeedMode::Continuous => "continuous".to_string(),
        }
    }
}

/// The filter actually applied to a feed after doc-id overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveFilter {
    /// Filter name (`design/filter` or `_doc_ids`).
    pub name: String,
    /// Parameters passed to the filter.
    pub params: BTreeMap<String, Value>,
}

/// Filter and heartbeat options for a changes feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedOptions {
    /// Server-side filter function name.
    pub filter_name: Option<String>,
    /// Parameters for the filter function.
    pub filter_params: BTreeMap<String, Value>,
    /// Explicit document allow-list. When non-empty it replaces any filter.
    pub doc_ids: Vec<String>,
    /// Heartbeat interval requested from the server.
    pub heartbeat: Duration,
}

impl FeedOptions {
    /// Creates options with no filter and the default heartbeat.
    pub fn new() -> Self {
        Self {
            filter_name: None,
            filter_params: BTreeMap::new(),
            doc_ids: Vec::new(),
            heartbeat: DEFAULT_HEARTBEAT,
        }
    }

    /// Sets the filter name.
    pub fn with_filter(mut self, name: impl Into<String>) -> Self {
        self.filter_name = Some(name.into());
        self
    }

    /// Adds a filter parameter.
    pub fn with_filter_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter_params.insert(key.into(), value.into());
        self
    }

    /// Sets the document allow-list.
    pub fn with_doc_ids<I, S>(mut self, doc_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.doc_ids = doc_ids.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the heartbeat interval.
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Adds a filter parameter from any serializable value.
    ///
    /// Fails if the value cannot be represented as JSON (for example a map
    /// with non-string keys).
    pub fn set_filter_param<T: Serialize + ?Sized>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> ProtocolResult<()> {
        let key = key.into();
        let value = serde_json::to_value(value).map_err(|e| ProtocolError::FilterParam {
            key: key.clone(),
            message: e.to_string(),
        })?;
        self.filter_params.insert(key, value);
        Ok(())
    }

    /// Returns the heartbeat in whole milliseconds.
    pub fn heartbeat_millis(&self) -> u128 {
        self.heartbeat.as_millis()
    }

    /// Resolves the filter to apply. A non-empty doc-id list always wins
    /// over a named filter.
    pub fn effective_filter(&self) -> Option<EffectiveFilter> {
        if !self.doc_ids.is_empty() {
            let mut params = BTreeMap::new();
            params.insert(
                "doc_ids".to_string(),
                Value::from(self.doc_ids.clone()),
            );
            return Some(EffectiveFilter {
                name: DOC_IDS_FILTER.to_string(),
                params,
            });
        }

        self.filter_name.as_ref().map(|name| EffectiveFilter {
            name: name.clone(),
            params: self
                .filter_params
                .iter()
                .filter(|(key, _)| !RESERVED_OPTION_KEYS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        })
    }

    /// Filter parameter names that collide with tracker-owned options and
    /// are dropped from every request.
    pub fn shadowed_params(&self) -> Vec<&str> {
        self.filter_params
            .keys()
            .map(String::as_str)
            .filter(|key| RESERVED_OPTION_KEYS.contains(key))
            .collect()
    }
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn feed_tokens() {
        assert_eq!(FeedMode::OneShot.feed_token(), "normal");
        assert_eq!(FeedMode::LongPoll.feed_token(), "longpoll&limit=50");
        assert_eq!(FeedMode::Continuous.feed_token(), "continuous");
    }

    #[test]
    fn no_filter_by_default() {
        let options = FeedOptions::default();
        assert!(options.effective_filter().is_none());
        assert_eq!(options.heartbeat_millis(), 300_000);
    }

    #[test]
    fn named_filter_keeps_params() {
        let options = FeedOptions::new()
            .with_filter("app/by_channel")
            .with_filter_param("channel", "news");

        let filter = options.effective_filter().unwrap();
        assert_eq!(filter.name, "app/by_channel");
        assert_eq!(filter.params.get("channel"), Some(&json!("news")));
    }

    #[test]
    fn doc_ids_override_filter() {
        let options = FeedOptions::new()
            .with_filter("app/by_channel")
            .with_filter_param("channel", "news")
            .with_doc_ids(["a", "b"]);

        let filter = options.effective_filter().unwrap();
        assert_eq!(filter.name, DOC_IDS_FILTER);
        assert_eq!(filter.params.len(), 1);
        assert_eq!(filter.params.get("doc_ids"), Some(&json!(["a", "b"])));
    }

    #[test]
    fn reserved_param_names_are_dropped() {
        let options = FeedOptions::new()
            .with_filter("app/by_channel")
            .with_filter_param("since", 0)
            .with_filter_param("filter", "other")
            .with_filter_param("channel", "news");

        let filter = options.effective_filter().unwrap();
        assert_eq!(filter.params.len(), 1);
        assert_eq!(filter.params.get("channel"), Some(&json!("news")));
        assert_eq!(options.shadowed_params(), vec!["filter", "since"]);
    }

    #[test]
    fn empty_doc_ids_do_not_override() {
        let options = FeedOptions::new()
            .with_filter("app/f")
            .with_doc_ids(Vec::<String>::new());
        assert_eq!(options.effective_filter().unwrap().name, "app/f");
    }

    #[test]
    fn set_filter_param_rejects_unrepresentable_values() {
        let mut options = FeedOptions::new();
        options.set_filter_param("limit", &10).unwrap();
        assert_eq!(options.filter_params.get("limit"), Some(&json!(10)));

        let mut bad: HashMap<(u8, u8), u8> = HashMap::new();
        bad.insert((1, 2), 3);
        let err = options.set_filter_param("bad", &bad).unwrap_err();
        assert!(matches!(err, ProtocolError::FilterParam { ref key, .. } if key == "bad"));
    }
}
