//! HTTP seam for the polling transport.
//!
//! The tracker only needs "GET this URL with these headers and give me the
//! status and body". [`ReqwestFeedClient`] is the production implementation;
//! tests substitute scripted clients.

use crate::client::{CredentialStore, MemoryCredentialStore};
use crate::error::{TrackerError, TrackerResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// A changes-feed GET request.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedRequest {
    /// Feed URL without credentials.
    pub url: Url,
    /// Extra headers, in configuration order.
    pub headers: Vec<(String, String)>,
}

/// A fully read response.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body. Empty for error statuses.
    pub body: Bytes,
}

impl FeedResponse {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Returns true for statuses below 300.
    pub fn is_success(&self) -> bool {
        self.status < 300
    }
}

/// HTTP client abstraction.
///
/// Implementations must be safe to share between trackers and should map
/// connection-level failures to retryable [`TrackerError::Transport`] errors.
#[async_trait]
pub trait FeedHttpClient: Send + Sync {
    /// Sends a GET request and reads the whole response.
    async fn get(&self, request: FeedRequest) -> TrackerResult<FeedResponse>;
}

/// [`FeedHttpClient`] backed by `reqwest`, with preemptive basic auth from a
/// shared credential store.
///
/// Stored credentials are only sent to the host they are scoped to.
#[derive(Debug, Clone)]
pub struct ReqwestFeedClient {
    client: reqwest::Client,
    credentials: Arc<MemoryCredentialStore>,
}

impl ReqwestFeedClient {
    /// Creates a client with default settings.
    pub fn new() -> TrackerResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TrackerError::transport_fatal(e.to_string()))?;
        Ok(Self::with_client(client))
    }

    /// Wraps an existing `reqwest` client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            credentials: Arc::new(MemoryCredentialStore::new()),
        }
    }

    /// Returns the credential store consulted on every request.
    pub fn credential_store(&self) -> Arc<MemoryCredentialStore> {
        Arc::clone(&self.credentials)
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TrackerError {
    if err.is_timeout() {
        TrackerError::Timeout
    } else if err.is_builder() {
        TrackerError::transport_fatal(err.to_string())
    } else {
        TrackerError::transport_retryable(err.to_string())
    }
}

#[async_trait]
impl FeedHttpClient for ReqwestFeedClient {
    async fn get(&self, request: FeedRequest) -> TrackerResult<FeedResponse> {
        let mut builder = self.client.get(request.url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(credentials) = self.credentials.credentials() {
            if credentials.applies_to(&request.url) {
                builder = builder.basic_auth(credentials.username, Some(credentials.password));
            } else {
                debug!(host = request.url.host_str(), "stored credentials belong to another host");
            }
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        if status >= 300 {
            return Ok(FeedResponse::new(status, Bytes::new()));
        }

        let body = response.bytes().await.map_err(map_reqwest_error)?;
        debug!(status, body_size = body.len(), "received changes response");
        Ok(FeedResponse::new(status, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_statuses() {
        assert!(FeedResponse::new(200, "[]").is_success());
        assert!(FeedResponse::new(204, Bytes::new()).is_success());
        assert!(!FeedResponse::new(300, Bytes::new()).is_success());
        assert!(!FeedResponse::new(401, Bytes::new()).is_success());
    }

    #[test]
    fn reqwest_client_shares_its_store() {
        let client = ReqwestFeedClient::new().unwrap();
        let store = client.credential_store();
        store.install(crate::client::Credentials::new("bob", "pw"));
        assert!(client.credential_store().credentials().is_some());
    }
}
