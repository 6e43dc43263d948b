//! The assembled proxy: middleware chain, routes, and the caching relay.
//!
//! ```rust,no_run
//! use tts_cache_proxy::{Proxy, ProxyConfig, Server};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let proxy = Proxy::new(ProxyConfig::new("./tts_cache")).await?;
//! let server = Server::bind("127.0.0.1:22999").await?.with_cors(proxy.cors().clone());
//! server.run(move |req| {
//!     let proxy = proxy.clone();
//!     async move { proxy.handle(req).await }
//! }).await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod relay;

use std::sync::Arc;

use serde_json::json;
use thiserror::Error;

pub use error::ProxyError;
pub use relay::{Credential, Relay};

use crate::cache::{CacheStore, StoreError};
use crate::config::{ConfigError, ProxyConfig};
use crate::middleware::{LoggerMiddleware, MiddlewareHandler, Next, from_middleware};
use crate::router::Handler;
use crate::security::CorsMiddleware;
use crate::upstream::{UpstreamClient, UpstreamError};
use crate::{Request, Response, Router, StatusCode};

/// Why the proxy could not be assembled.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

/// A ready-to-serve caching proxy. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Proxy {
    config: Arc<ProxyConfig>,
    relay: Arc<Relay>,
    cors: CorsMiddleware,
    middlewares: Arc<[MiddlewareHandler]>,
    endpoint: Handler,
}

impl Proxy {
    /// Validates `config`, creates the cache directory, and builds the upstream client.
    pub async fn new(config: ProxyConfig) -> Result<Self, StartupError> {
        config.validate()?;
        let store = CacheStore::open(&config.cache_dir).await?;
        let upstream = UpstreamClient::new(config.upstream_url.clone(), config.upstream_timeout)?;
        let relay = Arc::new(Relay::new(store, upstream, config.fallback_api_key.clone()));

        let mut router = Router::new();
        router.options(&config.route, |_req: Request| async {
            Response::new(StatusCode::NO_CONTENT)
        });
        let synth = Arc::clone(&relay);
        router.post(&config.route, move |req: Request| {
            let relay = Arc::clone(&synth);
            async move { relay.handle(req).await }
        });
        router.fallback(|_req: Request| async {
            Response::json(StatusCode::NOT_FOUND, &json!({ "error": "Not Found" }))
        });

        let cors = CorsMiddleware::new().allow_origin(config.cors_origin.clone());
        let middlewares: Vec<MiddlewareHandler> = vec![
            from_middleware(Arc::new(LoggerMiddleware)),
            from_middleware(Arc::new(cors.clone())),
        ];

        Ok(Self {
            config: Arc::new(config),
            relay,
            cors,
            middlewares: middlewares.into(),
            endpoint: router.into_handler(),
        })
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn store(&self) -> &CacheStore {
        self.relay.store()
    }

    /// The CORS policy every response carries. Hand it to
    /// [`Server::with_cors`](crate::Server::with_cors) so rejections made
    /// before routing carry it too.
    pub fn cors(&self) -> &CorsMiddleware {
        &self.cors
    }

    /// Runs `request` through logging, CORS, and routing.
    pub async fn handle(&self, request: Request) -> Response {
        Next::new(Arc::clone(&self.middlewares), Arc::clone(&self.endpoint))
            .run(request)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Headers, Method};

    async fn proxy(dir: &tempfile::TempDir) -> Proxy {
        let config = ProxyConfig::new(dir.path().join("cache"))
            .with_upstream_url("http://127.0.0.1:9/v1/audio/speech")
            .unwrap();
        Proxy::new(config).await.unwrap()
    }

    #[tokio::test]
    async fn creates_cache_dir() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = proxy(&dir).await;
        assert!(proxy.store().root().is_dir());
        assert!(proxy.store().root().is_absolute());
    }

    #[tokio::test]
    async fn preflight_is_204_with_cors() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = proxy(&dir).await;
        let req = Request::new(Method::Options, "/v1/audio/speech", Headers::new(), "");
        let res = proxy.handle(req).await;
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        assert!(res.body_ref().is_empty());
        assert_eq!(res.headers().get("access-control-allow-origin"), Some("*"));
    }

    #[tokio::test]
    async fn unknown_path_is_404_with_cors() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = proxy(&dir).await;
        let req = Request::new(Method::Get, "/health", Headers::new(), "");
        let res = proxy.handle(req).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(res.headers().get("access-control-allow-methods"), Some("POST, OPTIONS"));
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProxyConfig::new(dir.path()).with_route("speech");
        assert!(matches!(
            Proxy::new(config).await,
            Err(StartupError::Config(ConfigError::Route(_)))
        ));
    }

    #[tokio::test]
    async fn missing_credential_is_401() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = proxy(&dir).await;
        let req = Request::new(
            Method::Post,
            "/v1/audio/speech",
            Headers::new(),
            r#"{"input":"hi"}"#,
        );
        let res = proxy.handle(req).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(res.headers().get("access-control-allow-origin"), Some("*"));
    }
}
