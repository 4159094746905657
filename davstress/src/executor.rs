//! The seam between virtual users and the network.
//!
//! Tasks never talk to the network directly. They issue requests through an [`HttpOperation`],
//! which is [`HttpRemote`](crate::http::HttpRemote) in production and a spy in tests.

use std::fmt;

use async_trait::async_trait;
pub use reqwest::{Method, StatusCode};

use crate::body::BodySource;
use crate::error::{TransportError, TransportResult};
use crate::identity::Credential;

/// Executes single HTTP requests on behalf of a virtual user.
#[async_trait]
pub trait HttpOperation: Send + Sync + fmt::Debug {
    /// Sends a request with the given `method` to `path`, authenticated with `credential`.
    ///
    /// Implementations must release any resource held by `body` before returning, regardless of
    /// the outcome.
    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: BodySource,
        credential: &Credential,
    ) -> TransportResult<StatusCode>;
}

/// Turns a non-success status into a [`TransportError::Status`].
pub fn expect_success(status: StatusCode) -> TransportResult<StatusCode> {
    if status.is_success() {
        Ok(status)
    } else {
        Err(TransportError::Status(status))
    }
}
