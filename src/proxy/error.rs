//! Failure taxonomy of a synthesis request and its mapping to responses.

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

use crate::http::{Response, StatusCode};

/// Why a synthesis request did not produce audio.
///
/// Every variant maps to exactly one response through
/// [`into_response`](Self::into_response).
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("Request body must be a JSON object")]
    NotAnObject,

    #[error("Only response_format={supported} is supported by this proxy")]
    UnsupportedFormat { supported: &'static str },

    #[error("Missing Authorization header and OPENAI_API_KEY env")]
    MissingCredential,

    /// The upstream answered with a non-success status. Relayed as-is.
    #[error("upstream returned {status}")]
    UpstreamStatus {
        status: StatusCode,
        content_type: Option<String>,
        body: Bytes,
    },

    #[error("Upstream connection failed: {0}")]
    UpstreamConnect(String),

    #[error("Failed to read cache")]
    CacheRead,

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

impl ProxyError {
    /// Status code this failure is reported with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidJson(_) | Self::NotAnObject | Self::UnsupportedFormat { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::MissingCredential => StatusCode::UNAUTHORIZED,
            Self::UpstreamStatus { status, .. } => *status,
            Self::UpstreamConnect(_) => StatusCode::BAD_GATEWAY,
            Self::CacheRead | Self::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Builds the response sent to the caller.
    ///
    /// Upstream-reported errors keep their body and content type; every other
    /// failure becomes `{"error": "<message>"}`.
    pub fn into_response(self) -> Response {
        let status = self.status();
        match self {
            Self::UpstreamStatus {
                content_type, body, ..
            } => Response::new(status)
                .header(
                    "Content-Type",
                    content_type.unwrap_or_else(|| "text/plain; charset=utf-8".to_owned()),
                )
                .body_bytes(body),
            other => Response::json(
                status,
                &ErrorBody {
                    error: &other.to_string(),
                },
            ),
        }
    }
}
