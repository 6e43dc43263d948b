//! Security middleware.
//!
//! - [`CorsMiddleware`]: Cross-Origin Resource Sharing headers on every response.

pub mod cors;

pub use cors::{CorsMiddleware, PREFERRED_KEY_HEADER};
