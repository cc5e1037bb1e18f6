//! # Changetrack Protocol
//!
//! Wire-level types and codecs for following a remote database's `_changes` feed.
//!
//! This crate provides:
//! - `SequenceId` and `ChangeRecord` for the entries a feed emits
//! - Feed address construction for the polling transports (`normal`, `longpoll`)
//! - The websocket feed address and the options payload sent after connecting
//! - Polling response body parsing
//! - Streaming frame tagging and parsing (plaintext, gzip, end-of-catch-up)
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod address;
mod change;
mod error;
mod frame;
mod options;
mod response;
mod sequence;

pub use address::{
    changes_feed_path, changes_feed_url, database_name, mask_credentials, parse_remote,
    strip_credentials, websocket_feed_url, websocket_options_payload,
};
pub use change::ChangeRecord;
pub use error::{ProtocolError, ProtocolResult};
pub use frame::{parse_tagged_frame, tag_frame, FrameEvent, FrameKind};
pub use options::{
    EffectiveFilter, FeedMode, FeedOptions, DEFAULT_HEARTBEAT, DOC_IDS_FILTER, LONGPOLL_LIMIT,
    RESERVED_OPTION_KEYS,
};
pub use response::{parse_longpoll_body, parse_normal_body};
pub use sequence::SequenceId;
