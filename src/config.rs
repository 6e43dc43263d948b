//! Process configuration.
//!
//! [`Args`] reads flags and environment variables once at startup and is
//! turned into an immutable [`ProxyConfig`] that the relay owns for its
//! lifetime.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::upstream::DEFAULT_TIMEOUT;

pub const DEFAULT_UPSTREAM_URL: &str = "https://api.openai.com/v1/audio/speech";
pub const DEFAULT_ROUTE: &str = "/v1/audio/speech";
pub const DEFAULT_CACHE_DIR: &str = "./tts_cache";

/// Invalid configuration detected at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid upstream URL {url:?}: {reason}")]
    UpstreamUrl { url: String, reason: String },

    #[error("route must start with '/', got {0:?}")]
    Route(String),

    #[error("upstream timeout must be greater than zero")]
    ZeroTimeout,
}

/// Settings the relay needs, fixed for the life of the process.
#[derive(Clone)]
pub struct ProxyConfig {
    pub upstream_url: reqwest::Url,
    pub route: String,
    pub cache_dir: PathBuf,
    pub cors_origin: String,
    /// Used as `Bearer <key>` when a request has no `Authorization` header.
    pub fallback_api_key: Option<String>,
    pub upstream_timeout: Duration,
}

impl ProxyConfig {
    /// Creates a configuration with defaults for everything but the cache directory.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            upstream_url: default_upstream_url(),
            route: DEFAULT_ROUTE.to_owned(),
            cache_dir: cache_dir.into(),
            cors_origin: "*".to_owned(),
            fallback_api_key: None,
            upstream_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Points the relay at another synthesis endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UpstreamUrl`] if `url` is not an absolute `http(s)` URL.
    pub fn with_upstream_url(mut self, url: &str) -> Result<Self, ConfigError> {
        self.upstream_url = parse_upstream_url(url)?;
        Ok(self)
    }

    #[must_use]
    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = route.into();
        self
    }

    #[must_use]
    pub fn with_cors_origin(mut self, origin: impl Into<String>) -> Self {
        self.cors_origin = origin.into();
        self
    }

    #[must_use]
    pub fn with_fallback_api_key(mut self, key: Option<String>) -> Self {
        self.fallback_api_key = key.filter(|k| !k.trim().is_empty());
        self
    }

    #[must_use]
    pub fn with_upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }

    /// Checks the invariants [`Proxy::new`](crate::Proxy::new) relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.route.starts_with('/') {
            return Err(ConfigError::Route(self.route.clone()));
        }
        if self.upstream_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }
}

impl std::fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("upstream_url", &self.upstream_url.as_str())
            .field("route", &self.route)
            .field("cache_dir", &self.cache_dir)
            .field("cors_origin", &self.cors_origin)
            .field(
                "fallback_api_key",
                &self.fallback_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("upstream_timeout", &self.upstream_timeout)
            .finish()
    }
}

fn default_upstream_url() -> reqwest::Url {
    match reqwest::Url::parse(DEFAULT_UPSTREAM_URL) {
        Ok(url) => url,
        Err(e) => unreachable!("built-in upstream URL is valid: {e}"),
    }
}

fn parse_upstream_url(raw: &str) -> Result<reqwest::Url, ConfigError> {
    let invalid = |reason: String| ConfigError::UpstreamUrl {
        url: raw.to_owned(),
        reason,
    };
    let url = reqwest::Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(invalid(format!("unsupported scheme {other:?}"))),
    }
}

/// Local caching proxy for a speech-synthesis endpoint.
#[derive(Parser, Debug, Clone)]
#[command(name = "tts-cache-proxy", version)]
#[command(about = "Local caching proxy for a speech-synthesis endpoint")]
pub struct Args {
    /// Address to bind
    #[arg(long, env = "TTS_PROXY_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to bind
    #[arg(long, env = "TTS_PROXY_PORT", default_value_t = 22999)]
    pub port: u16,

    /// Directory holding cached audio
    #[arg(long, env = "TTS_CACHE_DIR", default_value = DEFAULT_CACHE_DIR)]
    pub cache_dir: PathBuf,

    /// Upstream synthesis endpoint
    #[arg(long, env = "TTS_UPSTREAM_URL", default_value = DEFAULT_UPSTREAM_URL)]
    pub upstream_url: String,

    /// Path the proxy answers on
    #[arg(long, env = "TTS_PROXY_ROUTE", default_value = DEFAULT_ROUTE)]
    pub route: String,

    /// Value of Access-Control-Allow-Origin
    #[arg(long, env = "TTS_PROXY_CORS", default_value = "*")]
    pub cors_origin: String,

    /// API key used when a request carries no Authorization header
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Seconds to wait for the upstream to finish a synthesis call
    #[arg(long, env = "TTS_UPSTREAM_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT.as_secs())]
    pub upstream_timeout_secs: u64,
}

impl Args {
    /// Returns the `host:port` string to bind.
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Builds and validates the relay configuration.
    pub fn proxy_config(&self) -> Result<ProxyConfig, ConfigError> {
        let config = ProxyConfig::new(&self.cache_dir)
            .with_upstream_url(&self.upstream_url)?
            .with_route(&self.route)
            .with_cors_origin(&self.cors_origin)
            .with_fallback_api_key(self.api_key.clone())
            .with_upstream_timeout(Duration::from_secs(self.upstream_timeout_secs));
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = Args::try_parse_from(["tts-cache-proxy"]).unwrap();
        assert_eq!(args.bind_addr(), "127.0.0.1:22999");
        let config = args.proxy_config().unwrap();
        assert_eq!(config.upstream_url.as_str(), DEFAULT_UPSTREAM_URL);
        assert_eq!(config.route, DEFAULT_ROUTE);
        assert_eq!(config.cors_origin, "*");
        assert_eq!(config.upstream_timeout, Duration::from_secs(120));
    }

    #[test]
    fn flags_override_defaults() {
        let args = Args::try_parse_from([
            "tts-cache-proxy",
            "--host",
            "::1",
            "--port",
            "8080",
            "--cors-origin",
            "http://localhost:5173",
            "--upstream-url",
            "http://127.0.0.1:9000/speech",
            "--api-key",
            "sk-fallback",
            "--upstream-timeout-secs",
            "30",
        ])
        .unwrap();
        assert_eq!(args.bind_addr(), "[::1]:8080");
        let config = args.proxy_config().unwrap();
        assert_eq!(config.upstream_url.as_str(), "http://127.0.0.1:9000/speech");
        assert_eq!(config.fallback_api_key.as_deref(), Some("sk-fallback"));
        assert_eq!(config.upstream_timeout, Duration::from_secs(30));
    }

    #[test]
    fn rejects_bad_settings() {
        assert!(matches!(
            ProxyConfig::new("c").with_upstream_url("ftp://example.com/x"),
            Err(ConfigError::UpstreamUrl { .. })
        ));
        assert!(matches!(
            ProxyConfig::new("c").with_upstream_url("not a url"),
            Err(ConfigError::UpstreamUrl { .. })
        ));
        assert!(matches!(
            ProxyConfig::new("c").with_route("speech").validate(),
            Err(ConfigError::Route(_))
        ));
        assert!(matches!(
            ProxyConfig::new("c")
                .with_upstream_timeout(Duration::ZERO)
                .validate(),
            Err(ConfigError::ZeroTimeout)
        ));
    }

    #[test]
    fn blank_fallback_key_is_ignored() {
        let config = ProxyConfig::new("c").with_fallback_api_key(Some("  ".to_owned()));
        assert!(config.fallback_api_key.is_none());
    }

    #[test]
    fn debug_redacts_key() {
        let config = ProxyConfig::new("c").with_fallback_api_key(Some("sk-secret".to_owned()));
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
