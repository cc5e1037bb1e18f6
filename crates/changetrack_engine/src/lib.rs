//! # Changes-feed tracker
//!
//! Follows a remote database's changes feed and hands every change, in
//! order, to a [`ChangeTrackerClient`].
//!
//! This crate provides:
//! - A tracker controller with a single worker task per tracker
//! - A polling transport (`normal` and `longpoll` feeds)
//! - A websocket transport with caught-up notification and fallback signalling
//! - Exponential retry backoff
//! - HTTP (`reqwest`) and websocket (`tokio-tungstenite`) adapters
//!
//! ## Lifecycle
//!
//! ```text
//! new ──start──▶ Running ──stop / fatal error / one-shot done──▶ Stopped
//! ```
//!
//! ## Key Invariants
//!
//! - Changes reach the client in feed order, one at a time
//! - The checkpoint only advances past changes the client has seen
//! - Every tracker notifies its client exactly once when it stops
//! - Cancellation is never reported as an error
//! - A protocol-error close disables streaming for the remote

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backoff;
mod client;
mod config;
mod dispatch;
mod error;
mod http;
mod polling;
mod socket;
mod state;
mod streaming;
mod tracker;

pub use backoff::Backoff;
pub use client::{ChangeTrackerClient, CredentialStore, Credentials, MemoryCredentialStore, StopReport};
pub use config::{BackoffConfig, TrackerConfig, TransportKind};
pub use dispatch::ChangeDispatch;
pub use error::{TrackerError, TrackerResult};
pub use http::{FeedHttpClient, FeedRequest, FeedResponse, ReqwestFeedClient};
pub use socket::{
    CloseFrame, FeedSocket, FeedSocketConnector, SocketMessage, SocketRequest, TungsteniteConnector,
    TungsteniteSocket, NORMAL_CLOSURE, PROTOCOL_ERROR,
};
pub use state::TrackerState;
pub use tracker::ChangeTracker;
