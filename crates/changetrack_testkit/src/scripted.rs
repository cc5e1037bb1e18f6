//! Scripted network collaborators.
//!
//! Both collaborators answer from a queue set up by the test and record
//! what the tracker sent. Once the queue is empty they never answer, which
//! parks the tracker on a network call until it is stopped.

use async_trait::async_trait;
use bytes::Bytes;
use changetrack_engine::{
    CloseFrame, FeedHttpClient, FeedRequest, FeedResponse, FeedSocket, FeedSocketConnector,
    SocketMessage, SocketRequest, TrackerError, TrackerResult,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// One scripted answer to an HTTP request.
#[derive(Debug, Clone)]
pub enum HttpStep {
    /// Answer with this response.
    Respond(FeedResponse),
    /// Fail with this error.
    Fail(TrackerError),
    /// Never answer.
    Hang,
}

/// [`FeedHttpClient`] that answers from a script.
#[derive(Debug, Default)]
pub struct ScriptedHttpClient {
    steps: Mutex<VecDeque<HttpStep>>,
    requests: Mutex<Vec<FeedRequest>>,
}

impl ScriptedHttpClient {
    /// Creates a client with an empty script.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues a response.
    pub fn respond(self: Arc<Self>, status: u16, body: impl Into<Bytes>) -> Arc<Self> {
        self.push(HttpStep::Respond(FeedResponse::new(status, body)))
    }

    /// Queues an error.
    pub fn fail(self: Arc<Self>, err: TrackerError) -> Arc<Self> {
        self.push(HttpStep::Fail(err))
    }

    /// Queues a request that never completes.
    pub fn hang(self: Arc<Self>) -> Arc<Self> {
        self.push(HttpStep::Hang)
    }

    /// Queues any step.
    pub fn push(self: Arc<Self>, step: HttpStep) -> Arc<Self> {
        self.steps.lock().push_back(step);
        self
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<FeedRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Waits until at least `count` requests have been made.
    pub async fn wait_for_requests(&self, count: usize) {
        crate::client::wait_until(|| self.request_count() >= count, "requests").await;
    }
}

#[async_trait]
impl FeedHttpClient for ScriptedHttpClient {
    async fn get(&self, request: FeedRequest) -> TrackerResult<FeedResponse> {
        self.requests.lock().push(request);
        let step = self.steps.lock().pop_front().unwrap_or(HttpStep::Hang);
        match step {
            HttpStep::Respond(response) => Ok(response),
            HttpStep::Fail(err) => Err(err),
            HttpStep::Hang => std::future::pending().await,
        }
    }
}

/// Script for one websocket session.
#[derive(Debug, Clone)]
pub struct ScriptedSession {
    reject: Option<TrackerError>,
    messages: VecDeque<SocketMessage>,
    hold_open: bool,
}

impl ScriptedSession {
    /// A session that delivers its messages and then ends the stream.
    pub fn new() -> Self {
        Self {
            reject: None,
            messages: VecDeque::new(),
            hold_open: false,
        }
    }

    /// A connect attempt that fails with `err`.
    pub fn reject(err: TrackerError) -> Self {
        Self {
            reject: Some(err),
            ..Self::new()
        }
    }

    /// Queues a text message.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.messages.push_back(SocketMessage::Text(text.into()));
        self
    }

    /// Queues a binary message.
    pub fn binary(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.messages.push_back(SocketMessage::Binary(bytes.into()));
        self
    }

    /// Queues a close frame from the server.
    pub fn close(mut self, code: u16, reason: impl Into<String>) -> Self {
        self.messages
            .push_back(SocketMessage::Close(Some(CloseFrame::new(code, reason))));
        self
    }

    /// Keeps the session open after the last message.
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }
}

impl Default for ScriptedSession {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct SocketLog {
    sent: Vec<SocketMessage>,
    closes: Vec<CloseFrame>,
}

/// [`FeedSocketConnector`] that plays scripted sessions in order.
#[derive(Debug, Default)]
pub struct ScriptedSocketConnector {
    sessions: Mutex<VecDeque<ScriptedSession>>,
    requests: Mutex<Vec<SocketRequest>>,
    log: Arc<Mutex<SocketLog>>,
}

impl ScriptedSocketConnector {
    /// Creates a connector with no sessions.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues a session.
    pub fn session(self: Arc<Self>, session: ScriptedSession) -> Arc<Self> {
        self.sessions.lock().push_back(session);
        self
    }

    /// Connect requests received so far, including rejected ones.
    pub fn requests(&self) -> Vec<SocketRequest> {
        self.requests.lock().clone()
    }

    /// Number of connect attempts.
    pub fn connect_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Messages the tracker sent, across all sessions.
    pub fn sent(&self) -> Vec<SocketMessage> {
        self.log.lock().sent.clone()
    }

    /// Close frames the tracker sent.
    pub fn closes(&self) -> Vec<CloseFrame> {
        self.log.lock().closes.clone()
    }

    /// Waits until at least `count` connect attempts have been made.
    pub async fn wait_for_connects(&self, count: usize) {
        crate::client::wait_until(|| self.connect_count() >= count, "connects").await;
    }
}

#[async_trait]
impl FeedSocketConnector for ScriptedSocketConnector {
    async fn connect(&self, request: SocketRequest) -> TrackerResult<Box<dyn FeedSocket>> {
        self.requests.lock().push(request);
        let session = self.sessions.lock().pop_front();
        let Some(session) = session else {
            return std::future::pending().await;
        };
        if let Some(err) = session.reject {
            return Err(err);
        }
        Ok(Box::new(ScriptedSocket {
            messages: session.messages,
            hold_open: session.hold_open,
            log: Arc::clone(&self.log),
        }))
    }
}

struct ScriptedSocket {
    messages: VecDeque<SocketMessage>,
    hold_open: bool,
    log: Arc<Mutex<SocketLog>>,
}

#[async_trait]
impl FeedSocket for ScriptedSocket {
    async fn send(&mut self, message: SocketMessage) -> TrackerResult<()> {
        self.log.lock().sent.push(message);
        Ok(())
    }

    async fn recv(&mut self) -> TrackerResult<Option<SocketMessage>> {
        match self.messages.pop_front() {
            Some(message) => Ok(Some(message)),
            None if self.hold_open => std::future::pending().await,
            None => Ok(None),
        }
    }

    async fn close(&mut self, frame: CloseFrame) -> TrackerResult<()> {
        self.log.lock().closes.push(frame);
        Ok(())
    }
}
