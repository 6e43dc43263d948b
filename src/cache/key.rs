//! Cache key derivation.
//!
//! A key is either the SHA-256 of the canonical JSON form of the request
//! payload, or a caller-chosen name sanitized down to a safe file stem.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Maximum length, in characters, of a caller-supplied key.
pub const MAX_PREFERRED_KEY_LEN: usize = 64;

/// Maximum UTF-8 length of a caller-supplied key. Leaves room under the
/// 255-byte file name limit for the entry extension and temp-file suffix.
pub const MAX_PREFERRED_KEY_BYTES: usize = 200;

/// Identifier of a cache entry. Always safe to use as a file stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key for `payload`, honouring `preferred` when it survives
    /// sanitization.
    ///
    /// # Examples
    ///
    /// ```
    /// use serde_json::json;
    /// use tts_cache_proxy::cache::CacheKey;
    ///
    /// let a = CacheKey::derive(&json!({"voice": "alloy", "input": "hi"}), None);
    /// let b = CacheKey::derive(&json!({"input": "hi", "voice": "alloy"}), None);
    /// assert_eq!(a, b);
    /// assert_eq!(a.as_str().len(), 64);
    ///
    /// let named = CacheKey::derive(&json!({}), Some("../intro line"));
    /// assert_eq!(named.as_str(), "introline");
    /// ```
    pub fn derive(payload: &Value, preferred: Option<&str>) -> Self {
        preferred
            .and_then(Self::from_preferred)
            .unwrap_or_else(|| Self::from_payload(payload))
    }

    /// Hashes the canonical form of `payload`.
    pub fn from_payload(payload: &Value) -> Self {
        let digest = Sha256::digest(canonical_json(payload).as_bytes());
        Self(digest.iter().map(|b| format!("{b:02x}")).collect())
    }

    /// Sanitizes a caller-supplied key. Returns `None` when nothing usable is left.
    ///
    /// Only alphanumerics, `-` and `_` are kept; leading and trailing `-`, `_`,
    /// `.` and spaces are stripped; the result is capped at
    /// [`MAX_PREFERRED_KEY_LEN`] characters and [`MAX_PREFERRED_KEY_BYTES`]
    /// bytes, cut on a character boundary.
    pub fn from_preferred(raw: &str) -> Option<Self> {
        let kept: String = raw
            .chars()
            .filter(|c| c.is_alphanumeric() || matches!(c, '-' | '_'))
            .collect();
        let mut bytes = 0;
        let trimmed: String = kept
            .trim_matches(|c| matches!(c, '-' | '_' | '.' | ' '))
            .chars()
            .take(MAX_PREFERRED_KEY_LEN)
            .take_while(|c| {
                bytes += c.len_utf8();
                bytes <= MAX_PREFERRED_KEY_BYTES
            })
            .collect();
        (!trimmed.is_empty()).then_some(Self(trimmed))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serializes `value` with object keys sorted at every depth and no
/// insignificant whitespace. Non-ASCII text is emitted as UTF-8, not escaped.
pub fn canonical_json(value: &Value) -> String {
    sorted(value).to_string()
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let ordered: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, sorted(v))).collect();
            let mut out = Map::with_capacity(ordered.len());
            for (k, v) in ordered {
                out.insert(k.clone(), v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}
