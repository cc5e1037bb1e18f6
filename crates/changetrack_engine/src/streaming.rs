//! Websocket transport for `feed=websocket`.
//!
//! One session runs from connect to close. Sessions that end for ordinary
//! reasons are replaced after a backoff delay, resuming from the current
//! checkpoint. A protocol-error close or a refused upgrade means the remote
//! has no websocket feed; the transport then clears the tracker's
//! `can_connect` flag and stops so the owner can fall back to polling.

use crate::backoff::Backoff;
use crate::client::{ChangeTrackerClient, CredentialStore, Credentials};
use crate::error::{TrackerError, TrackerResult};
use crate::socket::{
    CloseFrame, FeedSocket, FeedSocketConnector, SocketMessage, SocketRequest, NORMAL_CLOSURE,
    PROTOCOL_ERROR,
};
use crate::tracker::TrackerContext;
use changetrack_protocol::{
    mask_credentials, parse_tagged_frame, strip_credentials, tag_frame, websocket_feed_url,
    websocket_options_payload, FrameEvent, FrameKind,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use url::Url;

const CLIENT_CLOSE_REASON: &str = "Client requested close";

/// Connection state of the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// How a session ended.
#[derive(Debug)]
enum SessionEnd {
    Cancelled,
    Reconnect(String),
    Fatal(TrackerError),
}

impl SessionEnd {
    fn from_error(err: TrackerError, running: bool) -> Self {
        if err.is_cancellation() || !running {
            SessionEnd::Cancelled
        } else if err.is_retryable() {
            SessionEnd::Reconnect(err.to_string())
        } else {
            SessionEnd::Fatal(err)
        }
    }

    fn from_close(frame: Option<CloseFrame>) -> Self {
        match frame {
            Some(frame) if frame.code == PROTOCOL_ERROR => {
                SessionEnd::Fatal(TrackerError::ProtocolClose {
                    code: frame.code,
                    reason: frame.reason,
                })
            }
            Some(frame) => SessionEnd::Reconnect(format!(
                "closed by remote ({} {})",
                frame.code, frame.reason
            )),
            None => SessionEnd::Reconnect("closed by remote".to_string()),
        }
    }
}

enum Next {
    Cancelled,
    Message(TrackerResult<Option<SocketMessage>>),
}

pub(crate) struct StreamingTransport {
    ctx: Arc<TrackerContext>,
    remote: Url,
    socket_url: Url,
    connector: Arc<dyn FeedSocketConnector>,
    credentials: Arc<dyn CredentialStore>,
    backoff: Backoff,
    state: StreamState,
}

impl StreamingTransport {
    pub(crate) fn new(
        ctx: Arc<TrackerContext>,
        remote: Url,
        client: &dyn ChangeTrackerClient,
    ) -> TrackerResult<Self> {
        let socket_url = strip_credentials(&websocket_feed_url(&remote)?);
        websocket_options_payload(&ctx.config.options, ctx.config.since.as_ref())?;

        Ok(Self {
            backoff: Backoff::new(ctx.config.backoff.clone()),
            connector: client.socket_connector(),
            credentials: client.credential_store(),
            socket_url,
            remote,
            ctx,
            state: StreamState::Disconnected,
        })
    }

    pub(crate) async fn run(mut self) {
        while self.ctx.is_running() {
            self.state = StreamState::Connecting;
            let end = match self.connect().await {
                Ok(socket) => {
                    self.state = StreamState::Open;
                    self.session(socket).await
                }
                Err(err) => SessionEnd::from_error(err, self.ctx.is_running()),
            };
            self.state = StreamState::Disconnected;

            match end {
                SessionEnd::Cancelled => break,
                SessionEnd::Fatal(err) => {
                    if err.disables_streaming() {
                        warn!(error = %err, "remote does not support the websocket feed");
                        self.ctx.disable_streaming();
                    } else {
                        error!(error = %err, "change tracker failed");
                    }
                    self.ctx.record_error(err);
                    break;
                }
                SessionEnd::Reconnect(reason) => {
                    info!(reason = %reason, "websocket disconnected, reconnecting");
                    if !self.backoff.wait(&self.ctx.cancel).await {
                        break;
                    }
                }
            }
        }
        debug!(state = ?self.state, "streaming loop exited");
        self.ctx.finish();
    }

    fn socket_request(&self) -> SocketRequest {
        let config = &self.ctx.config;
        let mut headers: Vec<(String, String)> = config
            .request_headers
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        let configured = |wanted: &str| headers.iter().any(|(name, _)| name.eq_ignore_ascii_case(wanted));
        let has_cookie = configured("cookie");
        let has_authorization = configured("authorization");

        if !has_cookie {
            let cookie = self
                .ctx
                .dispatch
                .client()
                .and_then(|client| client.cookie_header(&self.remote));
            if let Some(cookie) = cookie {
                headers.push(("Cookie".to_string(), cookie));
            }
        }

        if let Some(credentials) = Credentials::from_url(&self.remote) {
            if self.credentials.install(credentials) {
                debug!("installed credentials from remote address");
            }
        }
        if !has_authorization {
            let credentials = self
                .credentials
                .credentials()
                .filter(|credentials| credentials.applies_to(&self.socket_url));
            if let Some(credentials) = credentials {
                headers.push(("Authorization".to_string(), credentials.basic_authorization()));
            }
        }

        SocketRequest {
            url: self.socket_url.clone(),
            headers,
        }
    }

    async fn connect(&self) -> TrackerResult<Box<dyn FeedSocket>> {
        let request = self.socket_request();
        debug!(url = %mask_credentials(request.url.as_str()), "opening websocket");
        tokio::select! {
            biased;
            _ = self.ctx.cancel.cancelled() => Err(TrackerError::Cancelled),
            result = self.connector.connect(request) => result,
        }
    }

    async fn session(&mut self, mut socket: Box<dyn FeedSocket>) -> SessionEnd {
        self.backoff.reset();

        let since = self.ctx.dispatch.checkpoint();
        let payload = match websocket_options_payload(&self.ctx.config.options, since.as_ref()) {
            Ok(payload) => payload,
            Err(err) => return SessionEnd::Fatal(err.into()),
        };
        if let Err(err) = socket.send(SocketMessage::Binary(payload)).await {
            return SessionEnd::from_error(err, self.ctx.is_running());
        }
        info!(since = ?since.as_ref().map(ToString::to_string), "websocket feed open");

        loop {
            let next = tokio::select! {
                biased;
                _ = self.ctx.cancel.cancelled() => Next::Cancelled,
                message = socket.recv() => Next::Message(message),
            };

            match next {
                Next::Cancelled => {
                    self.close(socket.as_mut()).await;
                    return SessionEnd::Cancelled;
                }
                Next::Message(Err(err)) => {
                    return SessionEnd::from_error(err, self.ctx.is_running())
                }
                Next::Message(Ok(None)) => {
                    return SessionEnd::Reconnect("stream ended".to_string())
                }
                Next::Message(Ok(Some(SocketMessage::Close(frame)))) => {
                    return SessionEnd::from_close(frame)
                }
                Next::Message(Ok(Some(SocketMessage::Text(text)))) => {
                    self.handle_payload(true, text.as_bytes())
                }
                Next::Message(Ok(Some(SocketMessage::Binary(bytes)))) => {
                    self.handle_payload(false, &bytes)
                }
            }
        }
    }

    fn handle_payload(&self, is_text: bool, payload: &[u8]) {
        if payload.is_empty() {
            return;
        }

        let kind = FrameKind::classify(is_text, payload);
        match parse_tagged_frame(&tag_frame(kind, payload)) {
            Ok(FrameEvent::CaughtUp) => {
                debug!(delivered = self.ctx.dispatch.delivered(), "caught up");
                self.ctx.dispatch.caught_up();
            }
            Ok(FrameEvent::Changes(changes)) => {
                for change in changes {
                    if !self.ctx.is_running() {
                        return;
                    }
                    if !self.ctx.dispatch.deliver(change) {
                        warn!("skipping change without seq");
                    }
                }
            }
            Err(err) => {
                let description = if is_text {
                    String::from_utf8_lossy(payload).into_owned()
                } else {
                    "<gzip stream>".to_string()
                };
                warn!(error = %err, payload = %description, "unparseable websocket message");
            }
        }
    }

    async fn close(&mut self, socket: &mut dyn FeedSocket) {
        self.state = StreamState::Closing;
        let frame = CloseFrame::new(NORMAL_CLOSURE, CLIENT_CLOSE_REASON);
        match tokio::time::timeout(self.ctx.config.close_timeout, socket.close(frame)).await {
            Ok(Ok(())) => debug!("websocket closed"),
            Ok(Err(err)) => debug!(error = %err, "websocket close failed"),
            Err(_) => debug!("websocket close timed out"),
        }
    }
}
