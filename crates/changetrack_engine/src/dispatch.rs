//! Delivery of changes to the client and checkpoint bookkeeping.

use crate::client::ChangeTrackerClient;
use changetrack_protocol::{ChangeRecord, SequenceId};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Hands parsed changes to the client and advances the checkpoint.
///
/// The checkpoint moves only after the client callback has returned. Once the
/// client is detached, deliveries are dropped.
pub struct ChangeDispatch {
    checkpoint: Mutex<Option<SequenceId>>,
    client: RwLock<Option<Arc<dyn ChangeTrackerClient>>>,
    delivered: AtomicU64,
}

impl ChangeDispatch {
    /// Creates a dispatcher starting from `since`.
    pub fn new(client: Arc<dyn ChangeTrackerClient>, since: Option<SequenceId>) -> Self {
        Self {
            checkpoint: Mutex::new(since),
            client: RwLock::new(Some(client)),
            delivered: AtomicU64::new(0),
        }
    }

    /// Delivers a raw change. Returns false if it has no usable `seq`.
    pub fn deliver(&self, change: Value) -> bool {
        match ChangeRecord::from_value(change) {
            Some(record) => self.deliver_record(&record),
            None => false,
        }
    }

    /// Delivers a parsed change. Returns false if it has no usable `seq` or
    /// the client is gone.
    pub fn deliver_record(&self, record: &ChangeRecord) -> bool {
        let Some(sequence) = record.sequence() else {
            return false;
        };

        let Some(client) = self.client() else {
            return false;
        };
        client.change_received(record);
        trace!(seq = %sequence, doc = record.doc_id().unwrap_or(""), "change delivered");
        *self.checkpoint.lock() = Some(sequence);
        self.delivered.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Tells the client the feed is live.
    pub fn caught_up(&self) {
        if let Some(client) = self.client() {
            client.caught_up();
        }
    }

    /// Last delivered sequence, or the starting one.
    pub fn checkpoint(&self) -> Option<SequenceId> {
        self.checkpoint.lock().clone()
    }

    /// Number of changes delivered so far.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Returns the attached client.
    pub fn client(&self) -> Option<Arc<dyn ChangeTrackerClient>> {
        self.client.read().clone()
    }

    /// Detaches and returns the client. Later calls return `None`.
    pub fn detach(&self) -> Option<Arc<dyn ChangeTrackerClient>> {
        self.client.write().take()
    }
}
