//! Error types for the change tracker.

use changetrack_protocol::ProtocolError;
use thiserror::Error;

/// Result type for tracker operations.
pub type TrackerResult<T> = Result<T, TrackerError>;

/// Errors that can occur while tracking a changes feed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    /// The remote address cannot be used.
    #[error("invalid remote address: {0}")]
    InvalidAddress(String),

    /// A filter parameter could not be serialized.
    #[error("filter parameter {key:?} is not serializable: {message}")]
    FilterParam {
        /// Parameter name.
        key: String,
        /// Serializer message.
        message: String,
    },

    /// The selected transport cannot run the configured feed mode.
    #[error("feed mode {0} is not supported by this transport")]
    UnsupportedMode(String),

    /// `start` was called outside a Tokio runtime.
    #[error("no async runtime available to run the tracker")]
    NoRuntime,

    /// The tracker already terminated; a new instance is required.
    #[error("tracker already stopped")]
    AlreadyStopped,

    /// Network or socket failure.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// The server answered a feed request with a status of 300 or above.
    #[error("change tracker got error: HTTP {status}")]
    Upstream {
        /// HTTP status code.
        status: u16,
    },

    /// The server refused the websocket upgrade.
    #[error("websocket upgrade rejected: HTTP {status}")]
    StreamingRejected {
        /// HTTP status code of the refusal.
        status: u16,
    },

    /// The server closed the websocket with a protocol error.
    #[error("websocket closed with protocol error {code}: {reason}")]
    ProtocolClose {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },

    /// A response body could not be interpreted.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The client went away before the tracker could run.
    #[error("change tracker client is no longer attached")]
    ClientDetached,

    /// The operation was cancelled by `stop`.
    #[error("cancelled")]
    Cancelled,
}

impl TrackerError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if the backoff policy should retry after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            TrackerError::Transport { retryable, .. } => *retryable,
            TrackerError::Timeout => true,
            _ => false,
        }
    }

    /// Returns true if the error comes from the tracker's configuration and
    /// was raised before any network attempt.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            TrackerError::InvalidAddress(_)
                | TrackerError::FilterParam { .. }
                | TrackerError::UnsupportedMode(_)
        )
    }

    /// Returns true if the error means the remote does not speak the
    /// websocket changes protocol and a polling transport should be used.
    pub fn disables_streaming(&self) -> bool {
        matches!(
            self,
            TrackerError::StreamingRejected { .. } | TrackerError::ProtocolClose { .. }
        )
    }

    /// Returns true for cancellation, which is never reported as a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TrackerError::Cancelled)
    }
}

impl From<ProtocolError> for TrackerError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::InvalidAddress(message) => TrackerError::InvalidAddress(message),
            ProtocolError::FilterParam { key, message } => {
                TrackerError::FilterParam { key, message }
            }
            ProtocolError::MalformedPayload(message) | ProtocolError::Frame(message) => {
                TrackerError::MalformedPayload(message)
            }
        }
    }
}
