//! Deterministic cache keys derived from the request fingerprint

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Inputs that identify one cacheable response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheKeyEnvelope {
    /// HTTP method name (e.g. "GET")
    pub method: String,
    /// Host part the request URL is resolved against
    pub host: String,
    /// Request URL or path as declared by the request
    pub url: String,
    /// Request argument after the cache-name filter
    pub argument: Option<serde_json::Value>,
}

impl CacheKeyEnvelope {
    /// Fold a digest of a raw request body into the argument, so requests
    /// that differ only in their body get different keys
    #[must_use]
    pub fn with_body(mut self, body: &[u8]) -> Self {
        let digest = hex::encode(Sha256::digest(body));
        self.argument = Some(serde_json::json!({
            "argument": self.argument,
            "body_sha256": digest,
        }));
        self
    }
}

/// Hex-encoded SHA-256 fingerprint addressing one cache entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Compute the key for an envelope.
    ///
    /// Object members are sorted before hashing, so arguments with the same
    /// members hash the same regardless of insertion order.
    pub fn derive(envelope: &CacheKeyEnvelope) -> Result<Self> {
        let json = serde_json::to_value(envelope)
            .map_err(|e| Error::serialization(format!("Failed to encode key envelope: {e}")))?;
        let bytes = serde_json::to_vec(&canonicalize(json))
            .map_err(|e| Error::serialization(format!("Failed to serialize key envelope: {e}")))?;
        let digest = Sha256::digest(bytes);
        Ok(Self(hex::encode(digest)))
    }

    /// The key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn canonicalize(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: BTreeMap<String, serde_json::Value> = map
                .into_iter()
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            serde_json::Value::Object(sorted.into_iter().collect())
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(canonicalize).collect())
        }
        other => other,
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(argument: Option<serde_json::Value>) -> CacheKeyEnvelope {
        CacheKeyEnvelope {
            method: "GET".to_string(),
            host: "https://api.example.com".to_string(),
            url: "/v1/user".to_string(),
            argument,
        }
    }

    #[test]
    fn test_key_is_hex_sha256() {
        let key = CacheKey::derive(&envelope(None)).unwrap();
        assert_eq!(key.as_str().len(), 64);
        assert!(key.as_str().bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')));
    }

    #[test]
    fn test_argument_member_order_does_not_matter() {
        let a = CacheKey::derive(&envelope(Some(json!({"a": 1, "b": 2})))).unwrap();
        let b = CacheKey::derive(&envelope(Some(json!({"b": 2, "a": 1})))).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_method_changes_key() {
        let get = CacheKey::derive(&envelope(None)).unwrap();
        let mut post_env = envelope(None);
        post_env.method = "POST".to_string();
        let post = CacheKey::derive(&post_env).unwrap();
        assert_ne!(get, post);
    }

    #[test]
    fn test_body_digest_changes_key() {
        let plain = CacheKey::derive(&envelope(None)).unwrap();
        let first = CacheKey::derive(&envelope(None).with_body(b"{\"id\":1}")).unwrap();
        let second = CacheKey::derive(&envelope(None).with_body(b"{\"id\":2}")).unwrap();
        let again = CacheKey::derive(&envelope(None).with_body(b"{\"id\":1}")).unwrap();
        assert_ne!(plain, first);
        assert_ne!(first, second);
        assert_eq!(first, again);
    }
}
