//! Client for the upstream speech-synthesis endpoint.
//!
//! Exactly one `POST` is issued per call; there are no retries. The outcome
//! is split three ways: any HTTP response at all ([`UpstreamReply`], whatever
//! its status), no response ([`UpstreamError::Connect`]), or a failure after
//! the response started arriving ([`UpstreamError::Unexpected`]).

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use thiserror::Error;
use tracing::debug;

use crate::http::StatusCode;

/// Default bound on a single synthesis call. Long inputs take a while.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Failures that prevent an upstream response from being relayed.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// No response was received: connection refused, DNS or TLS failure, timeout.
    #[error("{0}")]
    Connect(#[source] reqwest::Error),

    /// Anything else that went wrong during the exchange.
    #[error("{0}")]
    Unexpected(String),
}

/// A complete upstream HTTP response.
#[derive(Debug, Clone)]
pub struct UpstreamReply {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl UpstreamReply {
    /// Returns `true` for a `2xx` status.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns `true` when the response declares an `audio/*` content type.
    pub fn is_audio(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.trim_start().to_ascii_lowercase().starts_with("audio/"))
    }
}

/// HTTP client bound to a single upstream URL.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    url: reqwest::Url,
}

impl UpstreamClient {
    /// Builds a client for `url` with the given per-call timeout.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::Unexpected`] if the TLS backend cannot be initialised.
    pub fn new(url: reqwest::Url, timeout: Duration) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UpstreamError::Unexpected(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, url })
    }

    /// Returns the upstream URL.
    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }

    /// Sends `body` (a JSON document) upstream with `authorization` as the
    /// `Authorization` header value.
    pub async fn synthesize(
        &self,
        body: Vec<u8>,
        authorization: &str,
    ) -> Result<UpstreamReply, UpstreamError> {
        let response = self
            .http
            .post(self.url.clone())
            .header(AUTHORIZATION, authorization)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "audio/mpeg")
            .body(body)
            .send()
            .await
            .map_err(classify)?;

        let status = StatusCode::from_u16(response.status().as_u16()).ok_or_else(|| {
            UpstreamError::Unexpected(format!("invalid upstream status {}", response.status()))
        })?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let body = response
            .bytes()
            .await
            .map_err(|e| UpstreamError::Unexpected(format!("failed to read upstream body: {e}")))?;

        debug!(status = status.as_u16(), bytes = body.len(), "upstream replied");
        Ok(UpstreamReply {
            status,
            content_type,
            body,
        })
    }
}

fn classify(err: reqwest::Error) -> UpstreamError {
    if err.is_connect() || err.is_timeout() || err.is_request() {
        UpstreamError::Connect(err)
    } else {
        UpstreamError::Unexpected(err.to_string())
    }
}
