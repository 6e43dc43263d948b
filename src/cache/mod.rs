//! Content-addressed audio cache.
//!
//! - [`CacheKey`]: derives a stable entry name from a request payload or a
//!   caller-preferred name.
//! - [`CacheStore`]: reads and atomically writes entries under a root directory.

pub mod key;
pub mod store;

pub use key::CacheKey;
pub use store::{CacheStore, StoreError};
