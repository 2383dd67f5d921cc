//! Cache key construction and sanitization (§4.4 "Key patterns").

use forge_crypto::sha256_hex_prefix;

const ALLOWED_MAX_LEN: usize = 128;

/// Sanitizes a user-input key component: `[a-zA-Z0-9_-]`, 1-128 chars pass
/// through unchanged; anything else is replaced by a hash of the original
/// input so the resulting key stays deterministic and safe to embed.
pub fn sanitize_component(input: &str) -> String {
    let is_clean = !input.is_empty()
        && input.len() <= ALLOWED_MAX_LEN
        && input.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if is_clean {
        return input.to_string();
    }
    format!("sanitized_{}", sha256_hex_prefix(input, 32))
}

/// Clamps a requested lineage traversal depth to `[1, 100]`.
pub fn clamp_depth(depth: u32) -> u32 {
    depth.clamp(1, 100)
}

pub fn capsule_key(pattern: &str, capsule_id: &str) -> String {
    pattern.replace("{id}", &sanitize_component(capsule_id))
}

pub fn lineage_key(pattern: &str, capsule_id: &str, depth: u32) -> String {
    let depth = clamp_depth(depth);
    pattern.replace("{id}", &sanitize_component(capsule_id)).replace("{depth}", &depth.to_string())
}

/// Hashes `query` plus a canonical (sorted-key) JSON encoding of `filters`
/// into the configured search key pattern.
pub fn search_key(pattern: &str, query: &str, filters: &serde_json::Value) -> String {
    let canonical_filters = canonicalize(filters);
    let query_hash = sha256_hex_prefix(&format!("{query}\u{0}{canonical_filters}"), 32);
    pattern.replace("{query_hash}", &query_hash)
}

/// Serializes a JSON value with object keys sorted, so semantically
/// identical filter sets hash the same regardless of insertion order.
fn canonicalize(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys.iter().map(|k| format!("\"{k}\":{}", canonicalize(&map[*k]))).collect();
            format!("{{{}}}", parts.join(","))
        }
        serde_json::Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_component_passes_through() {
        assert_eq!(sanitize_component("capsule-123_ABC"), "capsule-123_ABC");
    }

    #[test]
    fn dirty_component_is_replaced_with_a_hash() {
        let sanitized = sanitize_component("has spaces/and/slashes");
        assert!(sanitized.starts_with("sanitized_"));
        assert_eq!(sanitized.len(), "sanitized_".len() + 32);
    }

    #[test]
    fn empty_component_is_sanitized_too() {
        let sanitized = sanitize_component("");
        assert!(sanitized.starts_with("sanitized_"));
    }

    #[test]
    fn depth_clamps_to_the_allowed_range() {
        assert_eq!(clamp_depth(0), 1);
        assert_eq!(clamp_depth(50), 50);
        assert_eq!(clamp_depth(1000), 100);
    }

    #[test]
    fn search_key_is_stable_across_filter_key_order() {
        let pattern = "forge:search:{query_hash}";
        let a = search_key(pattern, "q", &serde_json::json!({"a": 1, "b": 2}));
        let b = search_key(pattern, "q", &serde_json::json!({"b": 2, "a": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn search_key_differs_for_different_queries() {
        let pattern = "forge:search:{query_hash}";
        let a = search_key(pattern, "q1", &serde_json::json!({}));
        let b = search_key(pattern, "q2", &serde_json::json!({}));
        assert_ne!(a, b);
    }
}
