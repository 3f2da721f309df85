//! Content-addressed cache keys
//!
//! A key is the SHA-256 of the canonical option set followed by the raw text.
//! The option JSON is length-prefixed, so no choice of text can shift bytes
//! across the boundary.

use crate::models::TextOptions;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;

/// Fixed-width key derived from `(text, options)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Derive the key for `text` under `options`
    ///
    /// Pure: equal text and equal options (in any key order) always give equal keys.
    pub fn derive(text: &str, options: &TextOptions) -> Self {
        let canonical = canonical_json(options.as_map());

        let mut hasher = Sha256::new();
        hasher.update((canonical.len() as u64).to_be_bytes());
        hasher.update(canonical.as_bytes());
        hasher.update(text.as_bytes());

        CacheKey(hasher.finalize().into())
    }

    /// Lowercase hex, 64 characters
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Key used in the shared tier: `"{namespace}:{operation}:{hex}"`
    pub fn namespaced(&self, namespace: &str, operation: &str) -> String {
        format!("{}:{}:{}", namespace, operation, self.to_hex())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Serialize an option map with object keys sorted at every depth
pub fn canonical_json(options: &Map<String, Value>) -> String {
    canonicalize(&Value::Object(options.clone())).to_string()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            // Holds with or without serde_json's preserve_order feature
            let mut sorted = Map::new();
            for (key, value) in entries {
                sorted.insert(key.clone(), canonicalize(value));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
