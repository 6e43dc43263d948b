//! The cache-backed synthesis relay.
//!
//! Per request: validate the payload, resolve a credential, derive the cache
//! key, then either serve the stored entry or make one upstream call, persist
//! its audio on success, and relay it.

use std::fmt;

use bytes::Bytes;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use super::error::ProxyError;
use crate::cache::{CacheKey, CacheStore};
use crate::http::{Headers, Request, Response, StatusCode};
use crate::security::PREFERRED_KEY_HEADER;
use crate::upstream::{UpstreamClient, UpstreamError};

/// The only output encoding the proxy caches and serves.
pub const SUPPORTED_FORMAT: &str = "mp3";

/// Content type of every audio response.
pub const AUDIO_CONTENT_TYPE: &str = "audio/mpeg";

/// Response header reporting whether the cache served the request.
pub const CACHE_STATUS_HEADER: &str = "X-Cache";

const ERROR_PREVIEW_BYTES: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
        }
    }
}

/// An `Authorization` header value. Never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Picks the caller's own `Authorization` header, else `Bearer <fallback>`.
    pub fn resolve(headers: &Headers, fallback_api_key: Option<&str>) -> Option<Self> {
        headers
            .get_non_empty("authorization")
            .map(str::to_owned)
            .or_else(|| fallback_api_key.map(|key| format!("Bearer {key}")))
            .map(Self)
    }

    pub fn header_value(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Serves synthesis requests from the cache or the upstream.
pub struct Relay {
    store: CacheStore,
    upstream: UpstreamClient,
    fallback_api_key: Option<String>,
}

impl Relay {
    pub fn new(store: CacheStore, upstream: UpstreamClient, fallback_api_key: Option<String>) -> Self {
        Self {
            store,
            upstream,
            fallback_api_key,
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Handles one synthesis request. Every outcome, including failures, is a response.
    pub async fn handle(&self, request: Request) -> Response {
        match self.synthesize(&request).await {
            Ok(response) => response,
            Err(err) => {
                match &err {
                    ProxyError::InvalidJson(_)
                    | ProxyError::NotAnObject
                    | ProxyError::UnsupportedFormat { .. }
                    | ProxyError::MissingCredential => debug!(error = %err, "request rejected"),
                    ProxyError::UpstreamStatus { .. } => {}
                    ProxyError::UpstreamConnect(_) => warn!(error = %err, "upstream unreachable"),
                    ProxyError::CacheRead | ProxyError::Unexpected(_) => {
                        error!(error = %err, "request failed")
                    }
                }
                err.into_response()
            }
        }
    }

    async fn synthesize(&self, request: &Request) -> Result<Response, ProxyError> {
        let payload = parse_payload(request.body())?;
        check_format(&payload)?;

        let credential = Credential::resolve(request.headers(), self.fallback_api_key.as_deref())
            .ok_or(ProxyError::MissingCredential)?;

        let payload = Value::Object(payload);
        let key = CacheKey::derive(&payload, request.headers().get(PREFERRED_KEY_HEADER));

        match self.store.lookup(&key).await {
            Ok(Some(audio)) => {
                info!(key = %key, bytes = audio.len(), "cache hit");
                return Ok(audio_response(StatusCode::OK, audio, CacheStatus::Hit));
            }
            Ok(None) => {}
            Err(e) => {
                error!(key = %key, error = %e, "cache read failed");
                return Err(ProxyError::CacheRead);
            }
        }

        info!(key = %key, upstream = %self.upstream.url(), "cache miss, forwarding upstream");
        let body = serde_json::to_vec(&payload).map_err(|e| ProxyError::Unexpected(e.to_string()))?;
        let reply = self
            .upstream
            .synthesize(body, credential.header_value())
            .await
            .map_err(|e| match e {
                UpstreamError::Connect(source) => ProxyError::UpstreamConnect(source.to_string()),
                UpstreamError::Unexpected(msg) => ProxyError::Unexpected(msg),
            })?;

        if !reply.is_success() {
            let preview = &reply.body[..reply.body.len().min(ERROR_PREVIEW_BYTES)];
            warn!(
                key = %key,
                status = reply.status.as_u16(),
                body = %String::from_utf8_lossy(preview),
                "upstream returned an error"
            );
            return Err(ProxyError::UpstreamStatus {
                status: reply.status,
                content_type: reply.content_type,
                body: reply.body,
            });
        }

        if reply.status == StatusCode::OK && reply.is_audio() {
            if let Err(e) = self.store.persist(&key, &reply.body).await {
                error!(key = %key, error = %e, "failed to write cache entry");
            }
        } else {
            debug!(
                key = %key,
                status = reply.status.as_u16(),
                content_type = reply.content_type.as_deref().unwrap_or("-"),
                "upstream reply not cacheable"
            );
        }

        Ok(audio_response(reply.status, reply.body, CacheStatus::Miss))
    }
}

/// Parses the request body. An empty body is an empty object.
fn parse_payload(body: &[u8]) -> Result<Map<String, Value>, ProxyError> {
    if body.is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_slice(body).map_err(ProxyError::InvalidJson)? {
        Value::Object(map) => Ok(map),
        _ => Err(ProxyError::NotAnObject),
    }
}

/// `response_format` defaults to the supported format when absent.
fn check_format(payload: &Map<String, Value>) -> Result<(), ProxyError> {
    match payload.get("response_format") {
        None => Ok(()),
        Some(Value::String(format)) if format == SUPPORTED_FORMAT => Ok(()),
        Some(_) => Err(ProxyError::UnsupportedFormat {
            supported: SUPPORTED_FORMAT,
        }),
    }
}

fn audio_response(status: StatusCode, audio: Bytes, cache: CacheStatus) -> Response {
    Response::new(status)
        .header("Content-Type", AUDIO_CONTENT_TYPE)
        .header("Content-Length", audio.len().to_string())
        .header(CACHE_STATUS_HEADER, cache.as_str())
        .body_bytes(audio)
}
