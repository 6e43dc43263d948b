//! Request routing: map an exact path and HTTP method to a handler.
//!
//! Routes are matched in registration order; the first route whose method and
//! path both match the incoming request wins. Unmatched requests go to the
//! fallback handler, which answers `404 Not Found` unless replaced.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::{Method, Request, Response, StatusCode};

/// Type-erased, heap-allocated async handler that turns a [`Request`] into a
/// [`Response`].
pub type Handler =
    Arc<dyn Fn(Request) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Request) -> impl Future<Output = Response> + Send` that is also
/// `Send + Sync + 'static` implements this trait through the blanket impl below.
pub trait IntoHandler: Send + Sync + 'static {
    /// Call the handler with the given request, boxing the returned future.
    fn call(&self, request: Request) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, request: Request) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin((self)(request))
    }
}

fn erase(handler: impl IntoHandler) -> Handler {
    Arc::new(move |request: Request| handler.call(request))
}

// A single registered route binding a method + exact path to a handler.
struct Route {
    method: Method,
    path: String,
    handler: Handler,
}

/// HTTP request router that dispatches requests to registered handler functions.
///
/// # Examples
///
/// ```rust,no_run
/// use tts_cache_proxy::{Request, Response, Router, StatusCode};
///
/// let mut router = Router::new();
/// router.options("/v1/audio/speech", |_req: Request| async { Response::new(StatusCode::NO_CONTENT) });
/// router.post("/v1/audio/speech", |_req: Request| async { Response::new(StatusCode::OK) });
/// ```
pub struct Router {
    routes: Vec<Route>,
    fallback: Handler,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// Create a new, empty `Router` whose fallback answers `404 Not Found`.
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            fallback: erase(|_req: Request| async { Response::new(StatusCode::NOT_FOUND) }),
        }
    }

    /// Register a handler for `POST` requests to `path`.
    pub fn post(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Post, path, handler);
    }

    /// Register a handler for `OPTIONS` requests to `path`.
    pub fn options(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Options, path, handler);
    }

    /// Replace the handler used when no route matches.
    pub fn fallback(&mut self, handler: impl IntoHandler) {
        self.fallback = erase(handler);
    }

    fn add_route(&mut self, method: Method, path: &str, handler: impl IntoHandler) {
        self.routes.push(Route {
            method,
            path: path.to_owned(),
            handler: erase(handler),
        });
    }

    /// Turns the router into a single [`Handler`], usable as the end of a
    /// middleware chain.
    pub fn into_handler(self) -> Handler {
        let router = Arc::new(self);
        Arc::new(move |request: Request| -> Pin<Box<dyn Future<Output = Response> + Send>> {
            let router = Arc::clone(&router);
            Box::pin(async move { router.route(request).await })
        })
    }

    /// Dispatch `request` to the first matching route, or to the fallback.
    pub async fn route(&self, request: Request) -> Response {
        let handler = self
            .routes
            .iter()
            .find(|r| &r.method == request.method() && r.path == request.path())
            .map(|r| &r.handler)
            .unwrap_or(&self.fallback);
        handler(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Headers;

    fn make_request(method: Method, path: &str) -> Request {
        Request::new(method, path, Headers::new(), "")
    }

    #[tokio::test]
    async fn empty_router_returns_404() {
        let router = Router::new();
        let res = router.route(make_request(Method::Get, "/")).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn method_and_path_must_both_match() {
        let mut router = Router::new();
        router.post("/speech", |_req: Request| async { Response::new(StatusCode::OK) });
        router.options("/speech", |_req: Request| async { Response::new(StatusCode::NO_CONTENT) });

        let cases = [
            (Method::Post, "/speech", StatusCode::OK),
            (Method::Options, "/speech", StatusCode::NO_CONTENT),
            (Method::Get, "/speech", StatusCode::NOT_FOUND),
            (Method::Post, "/speech/", StatusCode::NOT_FOUND),
            (Method::Post, "/other", StatusCode::NOT_FOUND),
        ];
        for (method, path, expected) in cases {
            let res = router.route(make_request(method.clone(), path)).await;
            assert_eq!(res.status(), expected, "{method} {path}");
        }
    }

    #[tokio::test]
    async fn query_string_is_ignored() {
        let mut router = Router::new();
        router.post("/speech", |_req: Request| async { Response::new(StatusCode::OK) });
        let res = router.route(make_request(Method::Post, "/speech?v=2")).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn first_matching_route_wins() {
        let mut router = Router::new();
        router.post("/p", |_req: Request| async { Response::new(StatusCode::OK) });
        router.post("/p", |_req: Request| async { Response::new(StatusCode::BAD_GATEWAY) });
        let res = router.route(make_request(Method::Post, "/p")).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn custom_fallback() {
        let mut router = Router::new();
        router.fallback(|_req: Request| async { Response::new(StatusCode::NOT_FOUND).body("nothing here") });
        let res = router.route(make_request(Method::Delete, "/x")).await;
        assert_eq!(&res.body_ref()[..], b"nothing here");
    }
}
