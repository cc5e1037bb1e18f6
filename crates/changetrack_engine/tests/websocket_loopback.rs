//! `TungsteniteConnector` against a loopback websocket server.

use changetrack_engine::{ChangeTracker, TrackerConfig, TrackerError, TungsteniteConnector};
use changetrack_testkit::prelude::*;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::path;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client() -> Arc<RecordingClient> {
    Arc::new(RecordingClient::new(
        ScriptedHttpClient::new(),
        Arc::new(TungsteniteConnector::default()),
    ))
}

#[tokio::test]
async fn delivers_changes_and_closes_cleanly() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let options = match ws.next().await.unwrap().unwrap() {
            Message::Binary(bytes) => serde_json::from_slice::<Value>(&bytes).unwrap(),
            other => panic!("expected options payload, got {other:?}"),
        };
        assert_eq!(options["feed"], "websocket");

        ws.send(Message::text(r#"[{"seq":1,"id":"a"},{"seq":2,"id":"b"}]"#))
            .await
            .unwrap();
        ws.send(Message::text("[]")).await.unwrap();

        loop {
            match ws.next().await {
                Some(Ok(Message::Close(frame))) => return frame,
                Some(Ok(_)) => continue,
                other => panic!("expected a close frame, got {other:?}"),
            }
        }
    });

    let client = client();
    let tracker = ChangeTracker::new(
        TrackerConfig::streaming(format!("http://{addr}/db")).with_backoff(fast_backoff()),
        client.clone(),
    );
    tracker.start().unwrap();
    client.wait_for_caught_up(1).await;
    assert_eq!(client.changes().len(), 2);

    tracker.stop();
    tracker.wait_stopped().await;

    let frame = server.await.unwrap().expect("close frame");
    assert_eq!(frame.code, CloseCode::Normal);
    assert_eq!(frame.reason.as_str(), "Client requested close");
    assert_eq!(client.wait_for_stop().await.last_error, None);
}

#[tokio::test]
async fn protocol_error_close_from_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _options = ws.next().await;
        let _ = ws
            .close(Some(CloseFrame {
                code: CloseCode::Protocol,
                reason: "no websocket feed".into(),
            }))
            .await;
        while ws.next().await.is_some() {}
    });

    let client = client();
    let tracker = ChangeTracker::new(
        TrackerConfig::streaming(format!("http://{addr}/db")).with_backoff(fast_backoff()),
        client.clone(),
    );
    tracker.start().unwrap();

    let report = client.wait_for_stop().await;
    assert!(!report.can_connect);
    assert!(matches!(
        report.last_error,
        Some(TrackerError::ProtocolClose { code: 1002, .. })
    ));
}

#[tokio::test]
async fn plain_http_server_rejects_the_upgrade() {
    let server = MockServer::start().await;
    Mock::given(path("/db/_changes"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;

    let client = client();
    let tracker = ChangeTracker::new(
        TrackerConfig::streaming(format!("{}/db", server.uri())).with_backoff(fast_backoff()),
        client.clone(),
    );
    tracker.start().unwrap();

    let report = client.wait_for_stop().await;
    assert!(!report.can_connect);
    assert_eq!(
        report.last_error,
        Some(TrackerError::StreamingRejected { status: 400 })
    );
}
