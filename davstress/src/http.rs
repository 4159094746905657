//! Contains a remote implementation using HTTP to talk to a WebDAV server.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};

use crate::body::BodySource;
use crate::error::TransportResult;
use crate::executor::{HttpOperation, expect_success};
use crate::identity::Credential;

/// A remote implementation using HTTP to talk to a WebDAV server.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    /// Base URL of the server, without a trailing slash.
    remote: String,
    /// The HTTP client used to talk to the server.
    client: Client,
}

impl HttpRemote {
    /// Creates a new `HttpRemote` for the given base URL and a default client.
    pub fn new(remote: impl Into<String>) -> Self {
        Self::with_client(remote, Client::new())
    }

    /// Creates a new `HttpRemote` whose requests time out after `timeout`.
    pub fn with_timeout(remote: impl Into<String>, timeout: Duration) -> TransportResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(remote, client))
    }

    /// Creates a new `HttpRemote` using an existing client.
    pub fn with_client(remote: impl Into<String>, client: Client) -> Self {
        let remote = remote.into().trim_end_matches('/').to_owned();
        Self { remote, client }
    }

    /// Returns the full URL for the given path.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.remote, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl HttpOperation for HttpRemote {
    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: BodySource,
        credential: &Credential,
    ) -> TransportResult<StatusCode> {
        let url = self.url(path);
        let mut request = self
            .client
            .request(method.clone(), &url)
            .basic_auth(credential.username(), Some(credential.password()));

        if let BodySource::Generated(payload) = &body {
            request = request.header(reqwest::header::CONTENT_LENGTH, payload.len);
        }
        if !matches!(body, BodySource::Empty) {
            request = request.body(body.into_body().await?);
        }

        let response = request.send().await?;
        let status = response.status();
        tracing::trace!(%method, %url, %status, "request finished");

        expect_success(status)
    }
}
