//! Per-sender monotonic nonce enforcement (§4.3).
//!
//! Prevents replay of signed peer messages: each sender gets a single
//! forward-only counter, backed by [`forge_core::TieredKv`] so the same
//! Redis-preferred, memory-fallback tiering applies here as in
//! `forge_cache` and `forge_session`.

pub mod error;
pub mod store;

pub use error::NonceError;
pub use store::{NonceStore, DEFAULT_KEY_PREFIX, DEFAULT_MAX_MEMORY_ENTRIES, DEFAULT_TTL_SECONDS, REASON_NOT_GREATER, REASON_OK, REASON_REPLAY};
