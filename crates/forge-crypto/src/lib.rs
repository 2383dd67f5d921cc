//! Cryptographic primitives for the Forge federation protocol.
//!
//! - [`signing`]: Ed25519 signing and verification for handshakes and sync
//!   payloads.
//! - [`canonical`]: deterministic canonicalization and content hashing so
//!   signatures verify across independent implementations.
//! - [`hashing`]: SHA-256 helpers used outside the signing path (user-agent
//!   fingerprinting, cache key sanitization).

pub mod canonical;
pub mod error;
pub mod hashing;
pub mod signing;

pub use canonical::{canonicalize, content_hash};
pub use error::{CryptoError, CryptoResult};
pub use hashing::{sha256_hex, sha256_hex_prefix};
pub use signing::{verify, PeerSigningKey};
