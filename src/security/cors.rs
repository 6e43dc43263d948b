//! Cross-Origin Resource Sharing headers for browser callers.

use std::future::Future;
use std::pin::Pin;

use crate::{
    Request, Response,
    middleware::{Middleware, Next},
};

/// Header through which callers may name their own cache entry.
pub const PREFERRED_KEY_HEADER: &str = "X-Preferred-Cache-Key";

/// How long browsers may cache a preflight answer, in seconds.
const MAX_AGE_SECS: u64 = 600;

/// CORS middleware. Appends `Access-Control-*` headers to every response.
///
/// Headers are added whether or not the request carries an `Origin`, and on
/// error responses as well, so a browser can always read what went wrong.
/// Preflight answers themselves come from the route handler; this layer only
/// decorates them.
///
/// # Defaults
///
/// | Setting          | Default value                                        |
/// |------------------|------------------------------------------------------|
/// | Allowed origin   | `*`                                                  |
/// | Allowed methods  | `POST`, `OPTIONS`                                    |
/// | Allowed headers  | `Authorization`, `Content-Type`, `X-Preferred-Cache-Key` |
/// | Max age          | 600 seconds                                          |
///
/// # Examples
///
/// ```rust
/// use tts_cache_proxy::security::CorsMiddleware;
///
/// let cors = CorsMiddleware::new().allow_origin("https://reader.example.com");
/// ```
#[derive(Debug, Clone)]
pub struct CorsMiddleware {
    allow_origin: String,
}

impl Default for CorsMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl CorsMiddleware {
    /// Creates a policy with the defaults listed above.
    pub fn new() -> Self {
        Self {
            allow_origin: "*".to_owned(),
        }
    }

    /// Sets the value of `Access-Control-Allow-Origin`. `"*"` allows every origin.
    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.allow_origin = origin.into();
        self
    }

    /// Appends the CORS headers to `response`.
    pub fn apply(&self, response: &mut Response) {
        response.add_header("Access-Control-Allow-Origin", &self.allow_origin);
        response.add_header("Access-Control-Allow-Methods", "POST, OPTIONS");
        response.add_header(
            "Access-Control-Allow-Headers",
            format!("Authorization, Content-Type, {PREFERRED_KEY_HEADER}"),
        );
        response.add_header("Access-Control-Max-Age", MAX_AGE_SECS.to_string());
        if self.allow_origin != "*" {
            response.add_header("Vary", "Origin");
        }
    }
}

impl Middleware for CorsMiddleware {
    fn handle(&self, request: Request, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let policy = self.clone();
        Box::pin(async move {
            let mut response = next.run(request).await;
            policy.apply(&mut response);
            response
        })
    }
}
