//! Async TCP server using Tokio.
//!
//! Accepts TCP connections and dispatches HTTP/1.1 requests to a handler function.
//! Connections are persistent unless the client asks otherwise.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::http::{
    StatusCode,
    request::{Request, RequestError},
    response::Response,
};
use crate::security::CorsMiddleware;

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it:
/// the largest accepted body plus 64 KiB of request line and headers.
const MAX_REQUEST_SIZE: usize = Request::MAX_BODY_SIZE + 64 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

const SERVER_HEADER: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// The proxy's HTTP listener.
///
/// # Examples
///
/// ```rust,no_run
/// use tts_cache_proxy::{Request, Response, Server, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::bind("127.0.0.1:22999").await?;
///     server.run(|_req: Request| async {
///         Response::new(StatusCode::NO_CONTENT)
///     }).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    cors: Option<CorsMiddleware>,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            cors: None,
        })
    }

    /// Applies `policy` to the responses the server produces itself
    /// (malformed, chunked, or oversized requests), which never reach the handler.
    #[must_use]
    pub fn with_cors(mut self, policy: CorsMiddleware) -> Self {
        self.cors = Some(policy);
        self
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections forever, dispatching each request to `handler`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run<H, F>(self, handler: H) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        self.run_until(handler, std::future::pending()).await
    }

    /// Like [`run`](Self::run), but stops accepting once `shutdown` resolves.
    ///
    /// Connections already accepted keep running on their own tasks.
    pub async fn run_until<H, F, S>(self, handler: H, shutdown: S) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
        S: Future<Output = ()>,
    {
        let handler = Arc::new(handler);
        let cors = self.cors.map(Arc::new);
        info!(address = %self.local_addr, "listening");
        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested, no longer accepting connections");
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer_addr) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let handler = Arc::clone(&handler);
            let cors = cors.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, handler, cors).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Answers for requests that never reach the handler.
fn reject(status: StatusCode, message: String, cors: Option<&CorsMiddleware>) -> Response {
    let mut response = Response::json(status, &serde_json::json!({ "error": message }))
        .header("Server", SERVER_HEADER)
        .keep_alive(false);
    if let Some(policy) = cors {
        policy.apply(&mut response);
    }
    response
}

/// Handles a single TCP connection over its lifetime.
///
/// One request is read per iteration until the peer closes the connection or
/// signals `Connection: close`.
async fn handle_connection<H, F>(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<H>,
    cors: Option<Arc<CorsMiddleware>>,
) -> Result<(), std::io::Error>
where
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        // Pipelined requests may already be buffered; only read when nothing parses.
        let parsed = if buf.is_empty() {
            Err(RequestError::Incomplete)
        } else {
            Request::parse(&buf)
        };

        let (request, consumed) = match parsed {
            Ok(pair) => pair,
            Err(RequestError::Incomplete) => {
                if buf.len() > MAX_REQUEST_SIZE {
                    warn!(peer = %peer_addr, "request too large, sending 413");
                    let response = reject(
                        StatusCode::PAYLOAD_TOO_LARGE,
                        "Payload Too Large: request exceeds the size limit".to_owned(),
                        cors.as_deref(),
                    );
                    stream.write_all(&response.into_bytes()).await?;
                    break;
                }
                if stream.read_buf(&mut buf).await? == 0 {
                    debug!(peer = %peer_addr, "connection closed by peer");
                    break;
                }
                continue;
            }
            Err(e) => {
                let status = match e {
                    RequestError::ChunkedBody => StatusCode::LENGTH_REQUIRED,
                    RequestError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                    _ => StatusCode::BAD_REQUEST,
                };
                warn!(peer = %peer_addr, error = %e, status = status.as_u16(), "rejecting request");
                let response = reject(
                    status,
                    format!("{}: {e}", status.canonical_reason()),
                    cors.as_deref(),
                );
                stream.write_all(&response.into_bytes()).await?;
                break;
            }
        };

        let _ = buf.split_to(consumed);
        let keep_alive = request.is_keep_alive();

        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );

        let response = handler(request.with_remote_addr(peer_addr))
            .await
            .header("Server", SERVER_HEADER)
            .keep_alive(keep_alive);
        stream.write_all(&response.into_bytes()).await?;
        stream.flush().await?;

        if !keep_alive {
            debug!(peer = %peer_addr, "Connection: close, shutting down");
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    async fn start() -> (SocketAddr, oneshot::Sender<()>) {
        let server = Server::bind("127.0.0.1:0")
            .await
            .unwrap()
            .with_cors(CorsMiddleware::new());
        let addr = server.local_addr();
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(server.run_until(
            |req: Request| async move {
                let peer = req.remote_addr().map(|a| a.ip().to_string()).unwrap_or_default();
                Response::new(StatusCode::OK)
                    .header("X-Peer", peer)
                    .body_bytes(req.body().clone())
            },
            async {
                let _ = rx.await;
            },
        ));
        (addr, tx)
    }

    async fn exchange(addr: SocketAddr, raw: &[u8]) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw).await.unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        String::from_utf8_lossy(&out).into_owned()
    }

    #[tokio::test]
    async fn echoes_body_and_closes() {
        let (addr, _stop) = start().await;
        let out = exchange(
            addr,
            b"POST /x HTTP/1.1\r\nHost: a\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
        )
        .await;
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"), "{out}");
        assert!(out.contains("X-Peer: 127.0.0.1\r\n"));
        assert!(out.contains(&format!("Server: {SERVER_HEADER}\r\n")));
        assert!(out.contains("Connection: close\r\n"));
        assert!(out.ends_with("\r\n\r\nhello"));
    }

    #[tokio::test]
    async fn pipelined_requests_are_answered_in_order() {
        let (addr, _stop) = start().await;
        let out = exchange(
            addr,
            b"POST /a HTTP/1.1\r\nContent-Length: 3\r\n\r\none\
              POST /b HTTP/1.1\r\nContent-Length: 3\r\nConnection: close\r\n\r\ntwo",
        )
        .await;
        let first = out.find("one").unwrap();
        let second = out.find("two").unwrap();
        assert!(first < second);
        assert_eq!(out.matches("HTTP/1.1 200 OK").count(), 2);
    }

    #[tokio::test]
    async fn chunked_body_is_411() {
        let (addr, _stop) = start().await;
        let out = exchange(
            addr,
            b"POST /x HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n0\r\n\r\n",
        )
        .await;
        assert!(out.starts_with("HTTP/1.1 411 Length Required\r\n"), "{out}");
        assert!(out.contains("Access-Control-Allow-Origin: *\r\n"), "{out}");
        assert!(out.contains(r#"{"error":"Length Required: chunked"#), "{out}");
    }

    #[tokio::test]
    async fn huge_content_length_is_413() {
        let (addr, _stop) = start().await;
        let out = exchange(
            addr,
            b"POST /x HTTP/1.1\r\nContent-Length: 18446744073709551615\r\n\r\nabc",
        )
        .await;
        assert!(out.starts_with("HTTP/1.1 413 Payload Too Large\r\n"), "{out}");
        assert!(out.contains("Access-Control-Allow-Origin: *\r\n"), "{out}");
    }

    #[tokio::test]
    async fn garbage_is_400() {
        let (addr, _stop) = start().await;
        let out = exchange(addr, b"NOT HTTP AT ALL\r\n\r\n").await;
        assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{out}");
        assert!(out.contains(r#"{"error":"Bad Request: "#), "{out}");
        assert!(out.contains("Access-Control-Allow-Methods: POST, OPTIONS\r\n"));
    }

    #[tokio::test]
    async fn shutdown_stops_accepting() {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let result = server
            .run_until(|_req: Request| async { Response::new(StatusCode::OK) }, async {})
            .await;
        assert!(result.is_ok());
    }
}
