//! Deterministic canonicalization and content hashing (§4.7, §9 "Deterministic
//! signing").
//!
//! Payload canonicalization must be reproducible across independent
//! implementations, since the signature one peer computes has to verify on
//! another: sorted object keys, no insignificant whitespace, arrays left in
//! the order the caller provided them (order is significant data, not
//! incidental formatting).

use serde_json::Value;

use crate::error::{CryptoError, CryptoResult};

/// Serialize `value` to the canonical wire form used for hashing and
/// signing: object keys sorted recursively, compact separators.
pub fn canonicalize(value: &Value) -> CryptoResult<Vec<u8>> {
    let sorted = sort_keys(value);
    serde_json::to_vec(&sorted).map_err(|e| CryptoError::CanonicalizationFailed(e.to_string()))
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                sorted.insert(key.clone(), sort_keys(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Blake3 content hash of the canonical encoding, hex-encoded.
pub fn content_hash(value: &Value) -> CryptoResult<String> {
    let bytes = canonicalize(value)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_affect_hash() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
    }

    #[test]
    fn differing_content_differs_in_hash() {
        let a = json!({"a": 1});
        let b = json!({"a": 2});
        assert_ne!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
    }

    #[test]
    fn array_order_is_significant() {
        let a = json!({"tags": ["x", "y"]});
        let b = json!({"tags": ["y", "x"]});
        assert_ne!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
    }
}
