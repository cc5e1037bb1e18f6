//! # Changetrack Testkit
//!
//! Test utilities for change trackers.
//!
//! This crate provides:
//! - A recording [`ChangeTrackerClient`](changetrack_engine::ChangeTrackerClient)
//! - Scripted HTTP and websocket collaborators
//! - Change and response fixtures
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use changetrack_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn delivers_a_batch() {
//!     let http = ScriptedHttpClient::new()
//!         .respond(200, longpoll_body(&[change(1, "a")], 1));
//!     let client = RecordingClient::polling(http.clone());
//!     // ... build and start a tracker
//!     client.wait_for_changes(1).await;
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod fixtures;
pub mod generators;
pub mod scripted;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::client::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::scripted::*;
}

pub use client::*;
pub use fixtures::*;
pub use generators::*;
pub use scripted::*;
