//! The tracker controller: lifecycle, cancellation and the terminal
//! notification.

use crate::client::{ChangeTrackerClient, StopReport};
use crate::config::{TrackerConfig, TransportKind};
use crate::dispatch::ChangeDispatch;
use crate::error::{TrackerError, TrackerResult};
use crate::polling::PollingTransport;
use crate::state::TrackerState;
use crate::streaming::StreamingTransport;
use changetrack_protocol::{database_name, mask_credentials, parse_remote, SequenceId};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// State shared between a [`ChangeTracker`] handle and its worker task.
pub(crate) struct TrackerContext {
    pub(crate) id: Uuid,
    pub(crate) config: TrackerConfig,
    pub(crate) label: String,
    pub(crate) dispatch: ChangeDispatch,
    pub(crate) cancel: CancellationToken,
    state: watch::Sender<TrackerState>,
    last_error: Mutex<Option<TrackerError>>,
    can_connect: AtomicBool,
}

impl TrackerContext {
    fn new(config: TrackerConfig, client: Arc<dyn ChangeTrackerClient>) -> Self {
        let label = mask_credentials(&config.remote);
        let since = config.since.clone();
        let (state, _) = watch::channel(TrackerState::Idle);
        Self {
            id: Uuid::new_v4(),
            label,
            dispatch: ChangeDispatch::new(client, since),
            config,
            cancel: CancellationToken::new(),
            state,
            last_error: Mutex::new(None),
            can_connect: AtomicBool::new(true),
        }
    }

    pub(crate) fn state(&self) -> TrackerState {
        *self.state.borrow()
    }

    /// True while the worker should keep going.
    pub(crate) fn is_running(&self) -> bool {
        self.state() == TrackerState::Running && !self.cancel.is_cancelled()
    }

    pub(crate) fn record_error(&self, err: TrackerError) {
        if err.is_cancellation() {
            return;
        }
        *self.last_error.lock() = Some(err);
    }

    pub(crate) fn disable_streaming(&self) {
        self.can_connect.store(false, Ordering::SeqCst);
    }

    fn report(&self) -> StopReport {
        StopReport {
            tracker_id: self.id,
            last_error: self.last_error.lock().clone(),
            can_connect: self.can_connect.load(Ordering::SeqCst),
            checkpoint: self.dispatch.checkpoint(),
        }
    }

    /// Terminates the tracker. Only the first call notifies the client.
    pub(crate) fn finish(&self) {
        self.cancel.cancel();
        if let Some(client) = self.dispatch.detach() {
            let report = self.report();
            info!(
                tracker = %self.id,
                delivered = self.dispatch.delivered(),
                failed = report.last_error.is_some(),
                "change tracker stopped"
            );
            client.stopped(&report);
        }
        self.state.send_replace(TrackerState::Stopped);
    }

    pub(crate) fn fail(&self, err: TrackerError) {
        self.record_error(err);
        self.finish();
    }
}

enum Worker {
    Polling(PollingTransport),
    Streaming(StreamingTransport),
}

impl Worker {
    fn prepare(ctx: &Arc<TrackerContext>) -> TrackerResult<Self> {
        let remote = parse_remote(&ctx.config.remote)?;
        let client = ctx.dispatch.client().ok_or(TrackerError::ClientDetached)?;
        for key in ctx.config.options.shadowed_params() {
            warn!(tracker = %ctx.id, param = key, "filter parameter shadows a feed option and is ignored");
        }
        match ctx.config.transport {
            TransportKind::Polling => {
                PollingTransport::new(Arc::clone(ctx), remote, client.as_ref()).map(Worker::Polling)
            }
            TransportKind::Streaming => {
                StreamingTransport::new(Arc::clone(ctx), remote, client.as_ref())
                    .map(Worker::Streaming)
            }
        }
    }

    async fn run(self, ctx: Arc<TrackerContext>) {
        // A stop that raced the spawn has already notified the client.
        if ctx.dispatch.client().is_none() {
            debug!("client detached before the worker started");
            ctx.finish();
            return;
        }
        match self {
            Worker::Polling(transport) => transport.run().await,
            Worker::Streaming(transport) => transport.run().await,
        }
    }
}

/// Follows a remote changes feed and reports every change to a client.
///
/// A tracker is single-use: once it has stopped it cannot be started again.
/// Dropping a running tracker stops it.
///
/// ```no_run
/// # use changetrack_engine::{ChangeTracker, TrackerConfig};
/// # use changetrack_protocol::FeedMode;
/// # async fn demo(client: std::sync::Arc<dyn changetrack_engine::ChangeTrackerClient>) {
/// let config = TrackerConfig::new("https://sync.example.com/db", FeedMode::LongPoll)
///     .with_filter("app/by_owner")
///     .with_filter_param("owner", "alice");
/// let tracker = ChangeTracker::new(config, client);
/// tracker.start().unwrap();
/// // ...
/// tracker.stop();
/// tracker.wait_stopped().await;
/// # }
/// ```
pub struct ChangeTracker {
    ctx: Arc<TrackerContext>,
}

impl ChangeTracker {
    /// Creates an idle tracker.
    pub fn new(config: TrackerConfig, client: Arc<dyn ChangeTrackerClient>) -> Self {
        Self {
            ctx: Arc::new(TrackerContext::new(config, client)),
        }
    }

    /// Starts the worker task on the current Tokio runtime.
    ///
    /// Returns `Ok(false)` if the tracker is already running. Configuration
    /// errors are returned here, before any network attempt, and also
    /// terminate the tracker.
    pub fn start(&self) -> TrackerResult<bool> {
        let handle = Handle::try_current().map_err(|_| TrackerError::NoRuntime)?;

        let mut previous = TrackerState::Idle;
        let started = self.ctx.state.send_if_modified(|state| {
            previous = *state;
            if state.can_start() {
                *state = TrackerState::Running;
                true
            } else {
                false
            }
        });
        if !started {
            return match previous {
                TrackerState::Running => Ok(false),
                _ => Err(TrackerError::AlreadyStopped),
            };
        }

        let worker = match Worker::prepare(&self.ctx) {
            Ok(worker) => worker,
            Err(err) => {
                error!(tracker = %self.ctx.id, remote = %self.ctx.label, error = %err, "cannot start change tracker");
                self.ctx.fail(err.clone());
                return Err(err);
            }
        };

        info!(
            tracker = %self.ctx.id,
            remote = %self.ctx.label,
            db = self.database().as_deref().unwrap_or(""),
            transport = ?self.ctx.config.transport,
            mode = ?self.ctx.config.mode,
            "starting change tracker"
        );
        let span = info_span!("change_tracker", tracker = %self.ctx.id, remote = %self.ctx.label);
        handle.spawn(worker.run(Arc::clone(&self.ctx)).instrument(span));
        Ok(true)
    }

    /// Requests termination.
    ///
    /// Safe to call repeatedly and from any thread. In-flight network calls
    /// are abandoned through cancellation; this never waits for them.
    pub fn stop(&self) {
        let mut previous = TrackerState::Idle;
        self.ctx.state.send_if_modified(|state| {
            previous = *state;
            match state {
                TrackerState::Idle | TrackerState::Running => {
                    *state = TrackerState::Stopping;
                    true
                }
                _ => false,
            }
        });

        match previous {
            TrackerState::Idle => self.ctx.finish(),
            TrackerState::Running => {
                info!(tracker = %self.ctx.id, "stopping change tracker");
                self.ctx.cancel.cancel();
            }
            TrackerState::Stopping | TrackerState::Stopped => {}
        }
    }

    /// Waits until the tracker has terminated and the client was notified.
    pub async fn wait_stopped(&self) {
        let mut state = self.ctx.state.subscribe();
        // The sender lives in `self.ctx`, so the channel cannot close here.
        let _ = state.wait_for(TrackerState::is_terminal).await;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TrackerState {
        self.ctx.state()
    }

    /// Returns true while the worker is following the feed.
    pub fn is_running(&self) -> bool {
        self.ctx.is_running()
    }

    /// False once the remote has refused the websocket feed.
    pub fn can_connect(&self) -> bool {
        self.ctx.can_connect.load(Ordering::SeqCst)
    }

    /// Last delivered sequence.
    pub fn checkpoint(&self) -> Option<SequenceId> {
        self.ctx.dispatch.checkpoint()
    }

    /// The fatal error that ended the tracker, if any.
    pub fn last_error(&self) -> Option<TrackerError> {
        self.ctx.last_error.lock().clone()
    }

    /// Tracker instance ID.
    pub fn id(&self) -> Uuid {
        self.ctx.id
    }

    /// The tracker's configuration.
    pub fn config(&self) -> &TrackerConfig {
        &self.ctx.config
    }

    /// Name of the tracked database, if the remote address has one.
    pub fn database(&self) -> Option<String> {
        parse_remote(&self.ctx.config.remote)
            .ok()
            .and_then(|url| database_name(&url))
    }
}

impl fmt::Display for ChangeTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChangeTracker[{}]", self.ctx.label)
    }
}

impl fmt::Debug for ChangeTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeTracker")
            .field("id", &self.ctx.id)
            .field("remote", &self.ctx.label)
            .field("state", &self.ctx.state())
            .finish()
    }
}

impl Drop for ChangeTracker {
    fn drop(&mut self) {
        if self.ctx.state() == TrackerState::Running {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{CredentialStore, MemoryCredentialStore};
    use crate::http::{FeedHttpClient, FeedRequest, FeedResponse};
    use async_trait::async_trait;
    use changetrack_protocol::{ChangeRecord, FeedMode};
    use std::sync::atomic::AtomicUsize;

    struct NoHttp;

    #[async_trait]
    impl FeedHttpClient for NoHttp {
        async fn get(&self, _request: FeedRequest) -> TrackerResult<FeedResponse> {
            Ok(FeedResponse::new(500, ""))
        }
    }

    #[derive(Default)]
    struct CountStops {
        stops: AtomicUsize,
    }

    impl ChangeTrackerClient for CountStops {
        fn http_client(&self) -> Arc<dyn FeedHttpClient> {
            Arc::new(NoHttp)
        }

        fn credential_store(&self) -> Arc<dyn CredentialStore> {
            Arc::new(MemoryCredentialStore::new())
        }

        fn change_received(&self, _change: &ChangeRecord) {}

        fn stopped(&self, _report: &StopReport) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn worker_with_detached_client_still_terminates() {
        let client = Arc::new(CountStops::default());
        let config = TrackerConfig::new("http://localhost:4984/db", FeedMode::LongPoll);
        let ctx = Arc::new(TrackerContext::new(config, client.clone()));
        ctx.state.send_replace(TrackerState::Running);

        let worker = Worker::prepare(&ctx).unwrap();
        assert!(ctx.dispatch.detach().is_some());
        worker.run(Arc::clone(&ctx)).await;

        assert_eq!(ctx.state(), TrackerState::Stopped);
        assert!(ctx.cancel.is_cancelled());
        assert_eq!(client.stops.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn shadowing_filter_params_do_not_block_start() {
        let client = Arc::new(CountStops::default());
        let config = TrackerConfig::new("http://localhost:4984/db", FeedMode::LongPoll)
            .with_filter("app/by_channel")
            .with_filter_param("since", 0);
        let ctx = Arc::new(TrackerContext::new(config, client));

        assert!(Worker::prepare(&ctx).is_ok());
    }
}
