//! Configuration for change trackers.

use changetrack_protocol::{FeedMode, FeedOptions, SequenceId};
use rand::Rng;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Which wire strategy a tracker uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Request/response polling (`normal` or `longpoll` feeds).
    Polling,
    /// A persistent websocket (`feed=websocket`).
    Streaming,
}

/// Configuration for a single change tracker.
///
/// The configuration is fixed once the tracker is started.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Remote database URL, optionally with `user:password@` credentials.
    pub remote: String,
    /// Polling feed mode.
    pub mode: FeedMode,
    /// Checkpoint to resume from. `None` starts at the beginning of the feed.
    pub since: Option<SequenceId>,
    /// Wire strategy.
    pub transport: TransportKind,
    /// Filter, doc-id and heartbeat options.
    pub options: FeedOptions,
    /// Extra headers sent with every request. Keys are case-sensitive.
    pub request_headers: BTreeMap<String, String>,
    /// Retry backoff.
    pub backoff: BackoffConfig,
    /// Per-request timeout for polling. `None` relies on the HTTP client.
    pub request_timeout: Option<Duration>,
    /// How long a client-initiated websocket close may take.
    pub close_timeout: Duration,
}

impl TrackerConfig {
    /// Creates a polling configuration for the given remote and mode.
    pub fn new(remote: impl Into<String>, mode: FeedMode) -> Self {
        Self {
            remote: remote.into(),
            mode,
            since: None,
            transport: TransportKind::Polling,
            options: FeedOptions::default(),
            request_headers: BTreeMap::new(),
            backoff: BackoffConfig::default(),
            request_timeout: None,
            close_timeout: Duration::from_secs(5),
        }
    }

    /// Creates a websocket configuration for the given remote.
    pub fn streaming(remote: impl Into<String>) -> Self {
        Self::new(remote, FeedMode::Continuous).with_transport(TransportKind::Streaming)
    }

    /// Sets the transport.
    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    /// Sets the starting checkpoint.
    pub fn with_since(mut self, since: impl Into<SequenceId>) -> Self {
        self.since = Some(since.into());
        self
    }

    /// Sets the filter name.
    pub fn with_filter(mut self, name: impl Into<String>) -> Self {
        self.options.filter_name = Some(name.into());
        self
    }

    /// Adds a filter parameter.
    pub fn with_filter_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.filter_params.insert(key.into(), value.into());
        self
    }

    /// Restricts the feed to the given documents. Overrides any filter.
    pub fn with_doc_ids<I, S>(mut self, doc_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.doc_ids = doc_ids.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the heartbeat requested from the server.
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.options.heartbeat = heartbeat;
        self
    }

    /// Adds an extra request header.
    pub fn with_request_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request_headers.insert(name.into(), value.into());
        self
    }

    /// Sets the backoff configuration.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the websocket close timeout.
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self::new("", FeedMode::LongPoll)
    }
}

/// Configuration for retry backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor per consecutive failure.
    pub multiplier: f64,
    /// Scale each delay into 50-100% of its nominal value.
    pub jitter: bool,
}

impl BackoffConfig {
    /// Creates a backoff configuration with the given bounds.
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier: 2.0,
            jitter: false,
        }
    }

    /// Sets the multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Calculates the delay after `attempt` consecutive failures.
    ///
    /// Zero failures means no delay. A multiplier below 1.0 or not finite is
    /// treated as 1.0, and delays too large for a `Duration` become
    /// `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let multiplier = if self.multiplier.is_finite() && self.multiplier >= 1.0 {
            self.multiplier
        } else {
            1.0
        };
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let nominal = self.initial_delay.as_secs_f64() * multiplier.powi(exponent);
        let capped = nominal.min(self.max_delay.as_secs_f64());

        let delay = if self.jitter {
            capped * rand::thread_rng().gen_range(0.5..=1.0)
        } else {
            capped
        };

        Duration::try_from_secs_f64(delay).unwrap_or(self.max_delay)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(5 * 60))
    }
}
