//! HTTP/1.1 request parsing using the [`httparse`] crate.

use std::convert::Infallible;
use std::net::SocketAddr;

use bytes::Bytes;
use thiserror::Error;

use super::{Headers, Method};

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid Content-Length header: {value:?}")]
    InvalidContentLength { value: String },

    #[error("chunked request bodies are not supported; send Content-Length")]
    ChunkedBody,

    #[error("declared body of {length} bytes exceeds the {limit}-byte limit")]
    BodyTooLarge { length: usize, limit: usize },
}

/// A fully parsed HTTP/1.1 request.
///
/// Requests arrive either from the wire through [`Request::parse`] or are
/// built directly with [`Request::new`], which is how the proxy is exercised
/// without a listener.
///
/// # Examples
///
/// ```
/// use tts_cache_proxy::http::{Headers, Method, Request};
///
/// let raw = b"POST /v1/audio/speech?x=1 HTTP/1.1\r\nHost: localhost\r\nContent-Length: 2\r\n\r\n{}";
/// let (request, _offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method(), &Method::Post);
/// assert_eq!(request.path(), "/v1/audio/speech");
/// assert_eq!(&request.body()[..], b"{}");
///
/// let built = Request::new(Method::Options, "/v1/audio/speech", Headers::new(), "");
/// assert!(built.body().is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Largest `Content-Length` accepted (8 MiB).
    pub const MAX_BODY_SIZE: usize = 8 * 1024 * 1024;

    /// Builds an HTTP/1.1 request from its parts.
    ///
    /// A query string in `target` is split off the same way [`parse`](Self::parse) does.
    pub fn new(
        method: Method,
        target: impl AsRef<str>,
        headers: Headers,
        body: impl Into<Bytes>,
    ) -> Self {
        let path = strip_query(target.as_ref());
        Self {
            method,
            path,
            version: 1,
            headers,
            body: body.into(),
            remote_addr: None,
        }
    }

    /// Parse a raw HTTP/1.1 request from a byte slice.
    ///
    /// Returns the parsed `Request` and the total number of bytes it occupies
    /// in `buf` (headers plus `Content-Length` body bytes).
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`]: more data is needed to complete the headers or body.
    /// - [`RequestError::Parse`]: the data is malformed and cannot be parsed.
    /// - [`RequestError::MissingField`]: a required field (method, path, version) is absent.
    /// - [`RequestError::InvalidContentLength`]: `Content-Length` is not a number.
    /// - [`RequestError::ChunkedBody`]: the body uses chunked transfer encoding.
    /// - [`RequestError::BodyTooLarge`]: `Content-Length` exceeds [`MAX_BODY_SIZE`](Self::MAX_BODY_SIZE).
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method: Method = raw_req
            .method
            .ok_or(RequestError::MissingField { field: "method" })?
            .parse()
            .unwrap_or_else(|never: Infallible| match never {});

        let raw_path = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;
        let path = strip_query(raw_path);

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        if header_map
            .get("transfer-encoding")
            .is_some_and(|te| te.to_ascii_lowercase().contains("chunked"))
        {
            return Err(RequestError::ChunkedBody);
        }

        let content_length = match header_map.get("content-length") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .map_err(|_| RequestError::InvalidContentLength {
                    value: raw.to_owned(),
                })?,
            None => 0,
        };

        if content_length > Self::MAX_BODY_SIZE {
            return Err(RequestError::BodyTooLarge {
                length: content_length,
                limit: Self::MAX_BODY_SIZE,
            });
        }
        let total = body_offset + content_length;
        if buf.len() < total {
            return Err(RequestError::Incomplete);
        }
        let body = Bytes::copy_from_slice(&buf[body_offset..total]);

        Ok((
            Self {
                method,
                path,
                version,
                headers: header_map,
                body,
                remote_addr: None,
            },
            total,
        ))
    }

    /// Records the peer address the request arrived from.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the request body bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns the peer address, when the request came off a socket.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive. HTTP/1.0 defaults to close unless
    /// `Connection: keep-alive` is explicitly set.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }
}

fn strip_query(target: &str) -> String {
    target
        .split_once('?')
        .map_or(target, |(path, _)| path)
        .to_owned()
}
