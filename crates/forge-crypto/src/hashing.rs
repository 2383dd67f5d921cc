//! SHA-256 helpers for the places that call for that specific hash rather
//! than blake3: user-agent fingerprinting (§3.9) and cache key sanitization
//! (§4.4).

use sha2::{Digest, Sha256};

/// Full hex-encoded SHA-256 digest of `input`.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// First `len` hex characters of the SHA-256 digest of `input`.
pub fn sha256_hex_prefix(input: &str, len: usize) -> String {
    let digest = sha256_hex(input);
    digest.chars().take(len).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_input_same_digest() {
        assert_eq!(sha256_hex("Mozilla/5.0"), sha256_hex("Mozilla/5.0"));
    }

    #[test]
    fn different_input_different_digest() {
        assert_ne!(sha256_hex("Mozilla/5.0"), sha256_hex("curl/8.0"));
    }

    #[test]
    fn prefix_truncates() {
        let full = sha256_hex("forge:capsule:r1");
        let prefix = sha256_hex_prefix("forge:capsule:r1", 32);
        assert_eq!(prefix.len(), 32);
        assert!(full.starts_with(&prefix));
    }
}
