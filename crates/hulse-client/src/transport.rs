//! HTTP transport used by the consumer and producer loops.
//!
//! The loops only need two things from the network: open a streaming GET and
//! post a form. Keeping that behind a trait lets tests script whole
//! conversations without sockets.

use std::io;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use reqwest::header::{HeaderMap, AUTHORIZATION};
use tracing::debug;

use crate::error::ClientError;
use crate::settings::auth_header;

/// Response body, read lazily chunk by chunk.
pub type BodyStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Status, headers and the not-yet-read body of a streaming response.
pub struct StreamResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl StreamResponse {
    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outbound HTTP capability. Every request is authenticated with
/// `Authorization: Token <credential>`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a GET and return as soon as headers arrive.
    async fn open_stream(
        &self,
        url: &str,
        query: &[(&str, String)],
        credential: &str,
    ) -> Result<StreamResponse, ClientError>;

    /// POST url-encoded form fields, returning the response status.
    async fn post_form(
        &self,
        url: &str,
        form: &[(&str, String)],
        credential: &str,
    ) -> Result<u16, ClientError>;
}

/// [`Transport`] backed by `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    inner: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with a default `reqwest` client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport around an existing client.
    pub fn with_client(inner: reqwest::Client) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open_stream(
        &self,
        url: &str,
        query: &[(&str, String)],
        credential: &str,
    ) -> Result<StreamResponse, ClientError> {
        debug!(url = %url, params = query.len(), "Opening stream");

        let response = self
            .inner
            .get(url)
            .query(query)
            .header(AUTHORIZATION, auth_header(credential))
            .send()
            .await?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes_stream().map_err(io::Error::other);

        Ok(StreamResponse {
            status,
            headers,
            body: Box::pin(body),
        })
    }

    async fn post_form(
        &self,
        url: &str,
        form: &[(&str, String)],
        credential: &str,
    ) -> Result<u16, ClientError> {
        debug!(url = %url, "POST form");

        let response = self
            .inner
            .post(url)
            .form(form)
            .header(AUTHORIZATION, auth_header(credential))
            .send()
            .await?;

        Ok(response.status().as_u16())
    }
}
