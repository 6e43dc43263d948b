//! # tts-cache-proxy
//!
//! A local caching reverse proxy for a speech-synthesis HTTP endpoint.
//!
//! Identical synthesis requests are answered from disk; everything else is
//! forwarded once to the upstream service and its audio is kept for next time.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tts_cache_proxy::{Proxy, ProxyConfig, Request, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let proxy = Proxy::new(ProxyConfig::new("./tts_cache")).await?;
//!     let server = Server::bind("127.0.0.1:22999")
//!         .await?
//!         .with_cors(proxy.cors().clone());
//!     server.run(move |req: Request| {
//!         let proxy = proxy.clone();
//!         async move { proxy.handle(req).await }
//!     }).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod http;
pub mod middleware;
pub mod proxy;
pub mod router;
pub mod security;
pub mod server;
pub mod upstream;

pub use config::{Args, ProxyConfig};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use proxy::{Proxy, ProxyError, StartupError};
pub use router::Router;
pub use server::{Server, ServerError};
