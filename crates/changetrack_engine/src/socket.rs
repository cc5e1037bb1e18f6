//! Websocket seam for the streaming transport.

use crate::error::{TrackerError, TrackerResult};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as WsCloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::trace;
use url::Url;

/// Close code for a normal, client-requested close.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code the server uses to say it does not speak the feed protocol.
pub const PROTOCOL_ERROR: u16 = 1002;

/// A websocket close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// Close code.
    pub code: u16,
    /// Close reason.
    pub reason: String,
}

impl CloseFrame {
    /// Creates a close frame.
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// A data or close message on a feed socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketMessage {
    /// UTF-8 text message.
    Text(String),
    /// Binary message.
    Binary(Vec<u8>),
    /// Close message, with the peer's frame if it sent one.
    Close(Option<CloseFrame>),
}

/// Parameters for opening a feed socket.
#[derive(Debug, Clone, PartialEq)]
pub struct SocketRequest {
    /// `ws`/`wss` URL without credentials.
    pub url: Url,
    /// Headers sent with the upgrade request.
    pub headers: Vec<(String, String)>,
}

/// Opens feed sockets.
///
/// A refused upgrade must map to [`TrackerError::StreamingRejected`] so the
/// tracker can tell "this server has no websocket feed" from a network blip.
#[async_trait]
pub trait FeedSocketConnector: Send + Sync {
    /// Performs the websocket handshake.
    async fn connect(&self, request: SocketRequest) -> TrackerResult<Box<dyn FeedSocket>>;
}

/// An open feed socket.
#[async_trait]
pub trait FeedSocket: Send {
    /// Sends a message.
    async fn send(&mut self, message: SocketMessage) -> TrackerResult<()>;

    /// Receives the next message. `None` means the stream ended.
    async fn recv(&mut self) -> TrackerResult<Option<SocketMessage>>;

    /// Starts the close handshake.
    async fn close(&mut self, frame: CloseFrame) -> TrackerResult<()>;
}

/// [`FeedSocketConnector`] backed by `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct TungsteniteConnector {
    connect_timeout: Duration,
}

impl TungsteniteConnector {
    /// Creates a connector with the given handshake timeout.
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TungsteniteConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

fn map_ws_error(err: WsError) -> TrackerError {
    match err {
        WsError::Http(response) => TrackerError::StreamingRejected {
            status: response.status().as_u16(),
        },
        WsError::Url(e) => TrackerError::InvalidAddress(e.to_string()),
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            TrackerError::transport_retryable("websocket connection closed")
        }
        other => TrackerError::transport_retryable(other.to_string()),
    }
}

#[async_trait]
impl FeedSocketConnector for TungsteniteConnector {
    async fn connect(&self, request: SocketRequest) -> TrackerResult<Box<dyn FeedSocket>> {
        let mut upgrade = request
            .url
            .as_str()
            .into_client_request()
            .map_err(map_ws_error)?;
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TrackerError::transport_fatal(format!("header {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TrackerError::transport_fatal(format!("header {name}: {e}")))?;
            upgrade.headers_mut().insert(name, value);
        }

        let (stream, response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(upgrade))
                .await
                .map_err(|_| TrackerError::Timeout)?
                .map_err(map_ws_error)?;
        trace!(status = response.status().as_u16(), "websocket upgraded");

        Ok(Box::new(TungsteniteSocket { inner: stream }))
    }
}

/// [`FeedSocket`] over a `tokio-tungstenite` stream.
pub struct TungsteniteSocket {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FeedSocket for TungsteniteSocket {
    async fn send(&mut self, message: SocketMessage) -> TrackerResult<()> {
        let message = match message {
            SocketMessage::Text(text) => Message::text(text),
            SocketMessage::Binary(bytes) => Message::binary(bytes),
            SocketMessage::Close(frame) => Message::Close(frame.map(|f| WsCloseFrame {
                code: CloseCode::from(f.code),
                reason: f.reason.into(),
            })),
        };
        self.inner.send(message).await.map_err(map_ws_error)
    }

    async fn recv(&mut self) -> TrackerResult<Option<SocketMessage>> {
        loop {
            let message = match self.inner.next().await {
                None => return Ok(None),
                Some(message) => message.map_err(map_ws_error)?,
            };
            match message {
                Message::Text(text) => return Ok(Some(SocketMessage::Text(text.to_string()))),
                Message::Binary(bytes) => return Ok(Some(SocketMessage::Binary(bytes.to_vec()))),
                Message::Close(frame) => {
                    return Ok(Some(SocketMessage::Close(frame.map(|f| {
                        CloseFrame::new(u16::from(f.code), f.reason.to_string())
                    }))))
                }
                // Pings are answered by tungstenite on the next read or write.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }

    async fn close(&mut self, frame: CloseFrame) -> TrackerResult<()> {
        let frame = WsCloseFrame {
            code: CloseCode::from(frame.code),
            reason: frame.reason.into(),
        };
        match self.inner.close(Some(frame)).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(map_ws_error(e)),
        }
    }
}
