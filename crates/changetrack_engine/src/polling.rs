//! Request/response transport for `normal` and `longpoll` feeds.

use crate::backoff::Backoff;
use crate::client::{ChangeTrackerClient, CredentialStore, Credentials};
use crate::error::{TrackerError, TrackerResult};
use crate::http::{FeedHttpClient, FeedRequest, FeedResponse};
use crate::tracker::TrackerContext;
use changetrack_protocol::{
    changes_feed_url, mask_credentials, parse_longpoll_body, parse_normal_body,
    strip_credentials, ChangeRecord, FeedMode,
};
use std::sync::Arc;
use tracing::{debug, error, warn};
use url::Url;

/// Where the polling loop is within one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollState {
    /// Between requests.
    Idle,
    /// Waiting for the server.
    Requesting,
    /// Decoding and delivering a response body.
    ParsingResponse,
    /// The one-shot pass completed.
    Done,
    /// A fatal error ended the loop.
    Failed,
}

pub(crate) struct PollingTransport {
    ctx: Arc<TrackerContext>,
    remote: Url,
    http: Arc<dyn FeedHttpClient>,
    credentials: Arc<dyn CredentialStore>,
    backoff: Backoff,
    state: PollState,
}

impl PollingTransport {
    /// Validates the configuration against this transport.
    pub(crate) fn new(
        ctx: Arc<TrackerContext>,
        remote: Url,
        client: &dyn ChangeTrackerClient,
    ) -> TrackerResult<Self> {
        let config = &ctx.config;
        if config.mode == FeedMode::Continuous {
            return Err(TrackerError::UnsupportedMode(config.mode.feed_token()));
        }
        // Surfaces filter parameter problems before any request is made.
        changes_feed_url(&remote, config.mode, &config.options, config.since.as_ref())?;

        Ok(Self {
            backoff: Backoff::new(config.backoff.clone()),
            http: client.http_client(),
            credentials: client.credential_store(),
            remote,
            ctx,
            state: PollState::Idle,
        })
    }

    pub(crate) async fn run(mut self) {
        while self.ctx.is_running() {
            match self.poll_once().await {
                Ok(next) => {
                    self.backoff.reset();
                    self.state = next;
                    if next == PollState::Done {
                        debug!(delivered = self.ctx.dispatch.delivered(), "one-shot pass complete");
                        break;
                    }
                }
                Err(err) if err.is_cancellation() || !self.ctx.is_running() => {
                    debug!(error = %err, "changes request abandoned");
                    break;
                }
                Err(err) if err.is_retryable() => {
                    self.state = PollState::Idle;
                    warn!(error = %err, attempt = self.backoff.attempts() + 1, "changes request failed");
                    if !self.backoff.wait(&self.ctx.cancel).await {
                        break;
                    }
                }
                Err(err) => {
                    self.state = PollState::Failed;
                    error!(error = %err, "change tracker failed");
                    self.ctx.record_error(err);
                    break;
                }
            }
        }
        debug!(state = ?self.state, "polling loop exited");
        self.ctx.finish();
    }

    /// Runs one request and delivers its changes. Returns the next state.
    async fn poll_once(&mut self) -> TrackerResult<PollState> {
        let ctx = Arc::clone(&self.ctx);
        let config = &ctx.config;
        self.state = PollState::Requesting;

        let checkpoint = ctx.dispatch.checkpoint();
        let url = changes_feed_url(&self.remote, config.mode, &config.options, checkpoint.as_ref())?;
        if let Some(credentials) = Credentials::from_url(&self.remote) {
            if self.credentials.install(credentials) {
                debug!("installed credentials from remote address");
            }
        }

        let request = FeedRequest {
            url: strip_credentials(&url),
            headers: config
                .request_headers
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        };
        debug!(url = %mask_credentials(url.as_str()), "requesting changes");
        let response = self.send(request).await?;
        if !response.is_success() {
            return Err(TrackerError::Upstream {
                status: response.status,
            });
        }
        if ctx.cancel.is_cancelled() {
            return Err(TrackerError::Cancelled);
        }

        self.state = PollState::ParsingResponse;
        match config.mode {
            FeedMode::LongPoll => {
                self.deliver_batch(&response.body)?;
                Ok(PollState::Idle)
            }
            FeedMode::OneShot => {
                self.deliver_each(&response.body)?;
                Ok(PollState::Done)
            }
            FeedMode::Continuous => Err(TrackerError::UnsupportedMode(config.mode.feed_token())),
        }
    }

    async fn send(&self, request: FeedRequest) -> TrackerResult<FeedResponse> {
        let timeout = self.ctx.config.request_timeout;
        let exchange = async {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, self.http.get(request))
                    .await
                    .map_err(|_| TrackerError::Timeout)?,
                None => self.http.get(request).await,
            }
        };

        tokio::select! {
            biased;
            _ = self.ctx.cancel.cancelled() => Err(TrackerError::Cancelled),
            result = exchange => result,
        }
    }

    /// Long-poll batches are all or nothing: one change without `seq` fails
    /// the whole batch before anything is delivered.
    fn deliver_batch(&self, body: &[u8]) -> TrackerResult<()> {
        let records = parse_longpoll_body(body)?
            .into_iter()
            .enumerate()
            .map(|(index, value)| {
                ChangeRecord::from_value(value)
                    .filter(|record| record.sequence().is_some())
                    .ok_or_else(|| {
                        TrackerError::MalformedPayload(format!(
                            "long-poll result {index} has no seq"
                        ))
                    })
            })
            .collect::<TrackerResult<Vec<_>>>()?;

        for record in &records {
            if !self.ctx.is_running() {
                return Err(TrackerError::Cancelled);
            }
            if !self.ctx.dispatch.deliver_record(record) {
                return Err(TrackerError::ClientDetached);
            }
        }
        debug!(count = records.len(), "delivered long-poll batch");
        Ok(())
    }

    /// One-shot results skip changes that cannot be delivered.
    fn deliver_each(&self, body: &[u8]) -> TrackerResult<()> {
        let changes = parse_normal_body(body)?;
        let total = changes.len();
        let mut skipped = 0usize;
        for change in changes {
            if !self.ctx.is_running() {
                return Err(TrackerError::Cancelled);
            }
            if !self.ctx.dispatch.deliver(change) {
                skipped += 1;
                warn!("skipping change without seq");
            }
        }
        debug!(total, skipped, "delivered one-shot results");
        Ok(())
    }
}
