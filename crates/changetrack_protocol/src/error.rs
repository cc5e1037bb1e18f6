//! Error types for the changes-feed protocol.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while building feed addresses or decoding feed payloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The remote database address cannot be turned into a feed address.
    #[error("invalid feed address: {0}")]
    InvalidAddress(String),

    /// A filter parameter could not be serialized.
    #[error("filter parameter {key:?} is not serializable: {message}")]
    FilterParam {
        /// Parameter name.
        key: String,
        /// Serializer message.
        message: String,
    },

    /// A polling response body did not have the expected shape.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A streaming frame could not be decoded.
    #[error("undecodable frame: {0}")]
    Frame(String),
}

impl ProtocolError {
    /// Returns true if this error is caused by the tracker's own configuration
    /// rather than anything the remote sent.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ProtocolError::InvalidAddress(_) | ProtocolError::FilterParam { .. }
        )
    }
}
