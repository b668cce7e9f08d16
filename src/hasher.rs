//! Cache key digests
//!
//! Keys are hashed with SHA256 over `salt | canonical(key)`:
//!
//! - A key that serializes to a JSON string is hashed as the raw string.
//! - Any other key is rendered as canonical JSON: object members sorted by
//!   key at every depth, no insignificant whitespace, array order kept.
//!
//! Two structurally equal keys therefore hash identically no matter how
//! their maps were built. The salt is the cache format version; bumping it
//! orphans every previously computed digest without touching stored files.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::sync::Arc;

use crate::error::{CacheError, Result};

/// Default cache format version mixed into every key digest
pub const DEFAULT_FORMAT_VERSION: &str = "1";

/// Default number of hex characters kept from a key digest
pub const DEFAULT_SHA_LENGTH: usize = 32;

/// Default number of hex characters kept from a content digest
pub const DEFAULT_BLOB_HASH_LENGTH: usize = 64;

/// Full length of a hex encoded SHA256
const MAX_SHA_LENGTH: usize = 64;

/// Fixed-length lowercase hex digest used as a storage address
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Accept an existing hex digest, e.g. a file stem read back from disk
    pub fn parse(s: &str) -> Option<Self> {
        if !s.is_empty()
            && s.len() <= MAX_SHA_LENGTH
            && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            Some(Self(s.to_string()))
        } else {
            None
        }
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Salt and truncation applied to key digests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashOptions {
    pub salt: String,
    pub length: usize,
}

impl Default for HashOptions {
    fn default() -> Self {
        Self {
            salt: DEFAULT_FORMAT_VERSION.to_string(),
            length: DEFAULT_SHA_LENGTH,
        }
    }
}

/// Digest a cache key.
///
/// Fails only when the key cannot be represented as JSON (for example a map
/// with non-string keys), which is a bug at the call site.
pub fn digest<K: Serialize + ?Sized>(key: &K, options: &HashOptions) -> Result<Digest> {
    let value =
        serde_json::to_value(key).map_err(|e| CacheError::KeySerialization(Arc::new(e)))?;
    let material = match &value {
        Value::String(s) => s.clone(),
        other => canonical_json(other),
    };

    let mut hasher = Sha256::new();
    if !options.salt.is_empty() {
        hasher.update(options.salt.as_bytes());
        hasher.update(b"|");
    }
    hasher.update(material.as_bytes());

    Ok(truncate(hex::encode(hasher.finalize()), options.length))
}

/// Digest raw content bytes (no salt)
pub fn digest_bytes(bytes: &[u8], length: usize) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    truncate(hex::encode(hasher.finalize()), length)
}

/// Render a JSON value with object members sorted recursively
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut members: Vec<_> = map.iter().collect();
            members.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (k, v)) in members.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(k.clone()).to_string());
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn truncate(mut hex: String, length: usize) -> Digest {
    hex.truncate(length.clamp(1, MAX_SHA_LENGTH));
    Digest(hex)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_digest_is_stable() {
        let options = HashOptions::default();
        let a = digest("hello", &options).unwrap();
        let b = digest("hello", &options).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), DEFAULT_SHA_LENGTH);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_digest_known_value() {
        // sha256("1|hello")
        let options = HashOptions {
            salt: "1".to_string(),
            length: 64,
        };
        let mut hasher = Sha256::new();
        hasher.update(b"1|hello");
        let expected = hex::encode(hasher.finalize());
        assert_eq!(digest("hello", &options).unwrap().as_str(), expected);
    }

    #[test]
    fn test_salt_changes_digest() {
        let v1 = HashOptions {
            salt: "1".to_string(),
            length: 32,
        };
        let v2 = HashOptions {
            salt: "2".to_string(),
            length: 32,
        };
        assert_ne!(digest("key", &v1).unwrap(), digest("key", &v2).unwrap());
    }

    #[test]
    fn test_canonical_key_ordering() {
        // Object members are sorted at every depth before hashing.
        let options = HashOptions::default();
        let a = json!({"a": 1, "b": {"x": true, "y": [1, 2]}});
        let b = json!({"b": {"y": [1, 2], "x": true}, "a": 1});
        assert_eq!(digest(&a, &options).unwrap(), digest(&b, &options).unwrap());
        assert_eq!(canonical_json(&b), r#"{"a":1,"b":{"x":true,"y":[1,2]}}"#);
    }

    #[test]
    fn test_canonical_keeps_array_order() {
        let options = HashOptions::default();
        let a = digest(&json!([1, 2]), &options).unwrap();
        let b = digest(&json!([2, 1]), &options).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_structs_and_maps_hash_alike() {
        #[derive(Serialize)]
        struct Request {
            model: String,
            temperature: u32,
        }

        let options = HashOptions::default();
        let mut map = HashMap::new();
        map.insert("temperature", json!(0));
        map.insert("model", json!("gpt"));

        let from_struct = digest(
            &Request {
                model: "gpt".to_string(),
                temperature: 0,
            },
            &options,
        )
        .unwrap();
        assert_eq!(from_struct, digest(&map, &options).unwrap());
    }

    #[test]
    fn test_string_key_hashed_raw() {
        // A JSON string key is hashed without its quotes.
        let options = HashOptions::default();
        assert_ne!(
            digest("abc", &options).unwrap(),
            digest(&json!(["abc"]), &options).unwrap()
        );
        assert_eq!(
            digest("abc", &options).unwrap(),
            digest(&json!("abc"), &options).unwrap()
        );
    }

    #[test]
    fn test_non_serializable_key_fails() {
        let mut bad: HashMap<(u8, u8), u8> = HashMap::new();
        bad.insert((1, 2), 3);
        let err = digest(&bad, &HashOptions::default()).unwrap_err();
        assert!(matches!(err, CacheError::KeySerialization(_)));
    }

    #[test]
    fn test_length_is_clamped() {
        let options = HashOptions {
            salt: String::new(),
            length: 500,
        };
        assert_eq!(digest("k", &options).unwrap().as_str().len(), 64);
        assert_eq!(digest_bytes(b"k", 0).as_str().len(), 1);
    }

    #[test]
    fn test_digest_parse() {
        assert!(Digest::parse("abc123").is_some());
        assert!(Digest::parse("ABC").is_none());
        assert!(Digest::parse("").is_none());
        assert!(Digest::parse("db").is_some());
        assert!(Digest::parse("not-hex").is_none());
    }
}
