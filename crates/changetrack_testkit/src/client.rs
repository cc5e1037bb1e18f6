//! A client that records everything a tracker tells it.

use crate::scripted::{ScriptedHttpClient, ScriptedSocketConnector};
use changetrack_engine::{
    ChangeTrackerClient, CredentialStore, FeedHttpClient, FeedSocketConnector,
    MemoryCredentialStore, StopReport,
};
use changetrack_protocol::{ChangeRecord, SequenceId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// How long the `wait_for_*` helpers wait before failing the test.
pub const WAIT_LIMIT: Duration = Duration::from_secs(5);

/// Records changes, caught-up signals and stop reports.
pub struct RecordingClient {
    http: Arc<dyn FeedHttpClient>,
    connector: Arc<dyn FeedSocketConnector>,
    credentials: Arc<MemoryCredentialStore>,
    cookie: Option<String>,
    changes: Mutex<Vec<ChangeRecord>>,
    caught_up: AtomicUsize,
    reports: Mutex<Vec<StopReport>>,
}

impl RecordingClient {
    /// Creates a client over the given collaborators.
    pub fn new(http: Arc<dyn FeedHttpClient>, connector: Arc<dyn FeedSocketConnector>) -> Self {
        Self {
            http,
            connector,
            credentials: Arc::new(MemoryCredentialStore::new()),
            cookie: None,
            changes: Mutex::new(Vec::new()),
            caught_up: AtomicUsize::new(0),
            reports: Mutex::new(Vec::new()),
        }
    }

    /// A client for polling tests. Websocket connects never complete.
    pub fn polling(http: Arc<ScriptedHttpClient>) -> Arc<Self> {
        Arc::new(Self::new(http, ScriptedSocketConnector::new()))
    }

    /// A client for streaming tests. HTTP requests never complete.
    pub fn streaming(connector: Arc<ScriptedSocketConnector>) -> Arc<Self> {
        Arc::new(Self::new(ScriptedHttpClient::new(), connector))
    }

    /// Sets the cookie header returned for every address.
    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    /// Shares `store` with trackers, usually the store of a real HTTP client.
    pub fn with_credential_store(mut self, store: Arc<MemoryCredentialStore>) -> Self {
        self.credentials = store;
        self
    }

    /// The credential store handed to trackers.
    pub fn credentials(&self) -> Arc<MemoryCredentialStore> {
        Arc::clone(&self.credentials)
    }

    /// Changes received so far, in delivery order.
    pub fn changes(&self) -> Vec<ChangeRecord> {
        self.changes.lock().clone()
    }

    /// Sequences of the changes received so far.
    pub fn sequences(&self) -> Vec<SequenceId> {
        self.changes
            .lock()
            .iter()
            .filter_map(ChangeRecord::sequence)
            .collect()
    }

    /// Number of caught-up notifications.
    pub fn caught_up_count(&self) -> usize {
        self.caught_up.load(Ordering::SeqCst)
    }

    /// Stop reports received so far.
    pub fn stop_reports(&self) -> Vec<StopReport> {
        self.reports.lock().clone()
    }

    /// Waits until at least `count` changes have arrived.
    pub async fn wait_for_changes(&self, count: usize) {
        wait_until(|| self.changes.lock().len() >= count, "changes").await;
    }

    /// Waits until at least `count` caught-up notifications have arrived.
    pub async fn wait_for_caught_up(&self, count: usize) {
        wait_until(|| self.caught_up_count() >= count, "caught-up signal").await;
    }

    /// Waits for the first stop report and returns it.
    pub async fn wait_for_stop(&self) -> StopReport {
        wait_until(|| !self.reports.lock().is_empty(), "stop report").await;
        self.reports.lock()[0].clone()
    }
}

impl ChangeTrackerClient for RecordingClient {
    fn http_client(&self) -> Arc<dyn FeedHttpClient> {
        Arc::clone(&self.http)
    }

    fn socket_connector(&self) -> Arc<dyn FeedSocketConnector> {
        Arc::clone(&self.connector)
    }

    fn credential_store(&self) -> Arc<dyn CredentialStore> {
        self.credentials.clone()
    }

    fn cookie_header(&self, _url: &Url) -> Option<String> {
        self.cookie.clone()
    }

    fn change_received(&self, change: &ChangeRecord) {
        self.changes.lock().push(change.clone());
    }

    fn caught_up(&self) {
        self.caught_up.fetch_add(1, Ordering::SeqCst);
    }

    fn stopped(&self, report: &StopReport) {
        self.reports.lock().push(report.clone());
    }
}

/// Polls `done` until it returns true, panicking after [`WAIT_LIMIT`].
pub async fn wait_until(mut done: impl FnMut() -> bool, what: &str) {
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    while !done() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
