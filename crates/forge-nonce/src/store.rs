//! The nonce store (§4.3): forward-only per-sender nonce enforcement.

use std::time::Duration;

use forge_core::{NonceCasOutcome, TieredKv};
use tokio::sync::Mutex;
use tracing::instrument;

use crate::error::NonceError;

pub const DEFAULT_KEY_PREFIX: &str = "forge:acp:nonce:";
pub const DEFAULT_TTL_SECONDS: u64 = 300;
pub const DEFAULT_MAX_MEMORY_ENTRIES: usize = 100_000;

/// Reason string returned alongside `false` from
/// [`NonceStore::verify_and_consume_nonce`]; exposed as consts so callers can
/// match on them instead of comparing against literal text.
pub const REASON_OK: &str = "";
pub const REASON_REPLAY: &str = "replay attempt";
pub const REASON_NOT_GREATER: &str = "not greater than current";

pub struct NonceStore {
    backend: TieredKv,
    key_prefix: String,
    ttl: Duration,
    // `TieredKv::verify_and_consume_nonce` is atomic server-side on the Redis
    // tier (one Lua script) but is a plain read-then-write on the memory
    // tier, which has no server to script against. This lock is what makes
    // the memory tier's read-then-write atomic for callers in this process;
    // it is redundant (but harmless) overhead on the Redis tier, which is
    // already safe across processes without it.
    verify_lock: Mutex<()>,
}

impl NonceStore {
    pub fn new(backend: TieredKv, key_prefix: impl Into<String>, ttl_seconds: u64) -> Self {
        Self {
            backend,
            key_prefix: key_prefix.into(),
            ttl: Duration::from_secs(ttl_seconds),
            verify_lock: Mutex::new(()),
        }
    }

    pub fn memory_only(max_entries: usize) -> Self {
        Self::new(TieredKv::memory_only(max_entries), DEFAULT_KEY_PREFIX, DEFAULT_TTL_SECONDS)
    }

    pub async fn connect(redis_url: Option<&str>, key_prefix: impl Into<String>, ttl_seconds: u64, max_memory_entries: usize) -> Self {
        Self::new(TieredKv::connect(redis_url, max_memory_entries).await, key_prefix, ttl_seconds)
    }

    fn key_for(&self, sender: &str) -> String {
        format!("{}{}", self.key_prefix, sender.to_lowercase())
    }

    /// Atomically checks and advances the highest nonce seen for `sender`.
    /// `sender` is case-normalized before lookup/storage, so `Alice` and
    /// `alice` share one counter.
    #[instrument(skip(self))]
    pub async fn verify_and_consume_nonce(&self, sender: &str, nonce: u64) -> Result<(bool, &'static str), NonceError> {
        let _guard = self.verify_lock.lock().await;
        let key = self.key_for(sender);

        match self.backend.verify_and_consume_nonce(&key, nonce, self.ttl).await? {
            NonceCasOutcome::Advanced => Ok((true, REASON_OK)),
            NonceCasOutcome::Replay => Ok((false, REASON_REPLAY)),
            NonceCasOutcome::Stale => Ok((false, REASON_NOT_GREATER)),
        }
    }

    /// No-op on the Redis tier (TTL handles expiry there); scans and drops
    /// expired entries from the memory tier.
    pub async fn cleanup_expired(&self) -> usize {
        self.backend.memory().cleanup_expired().await
    }

    pub fn using_redis(&self) -> bool {
        self.backend.using_redis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn strictly_increasing_nonces_are_accepted() {
        let store = NonceStore::memory_only(100);
        assert_eq!(store.verify_and_consume_nonce("alice", 1).await.unwrap(), (true, REASON_OK));
        assert_eq!(store.verify_and_consume_nonce("alice", 2).await.unwrap(), (true, REASON_OK));
        assert_eq!(store.verify_and_consume_nonce("alice", 100).await.unwrap(), (true, REASON_OK));
    }

    #[tokio::test]
    async fn repeating_the_same_nonce_is_a_replay() {
        let store = NonceStore::memory_only(100);
        store.verify_and_consume_nonce("alice", 5).await.unwrap();
        assert_eq!(store.verify_and_consume_nonce("alice", 5).await.unwrap(), (false, REASON_REPLAY));
    }

    #[tokio::test]
    async fn a_lower_nonce_is_rejected_without_advancing_state() {
        let store = NonceStore::memory_only(100);
        store.verify_and_consume_nonce("alice", 10).await.unwrap();
        assert_eq!(store.verify_and_consume_nonce("alice", 3).await.unwrap(), (false, REASON_NOT_GREATER));
        // still at 10, a later call with 11 still succeeds
        assert_eq!(store.verify_and_consume_nonce("alice", 11).await.unwrap(), (true, REASON_OK));
    }

    #[tokio::test]
    async fn sender_is_case_normalized() {
        let store = NonceStore::memory_only(100);
        store.verify_and_consume_nonce("Alice", 1).await.unwrap();
        assert_eq!(store.verify_and_consume_nonce("ALICE", 1).await.unwrap(), (false, REASON_REPLAY));
    }

    #[tokio::test]
    async fn nonce_gaps_are_permitted() {
        let store = NonceStore::memory_only(100);
        store.verify_and_consume_nonce("bob", 1).await.unwrap();
        assert_eq!(store.verify_and_consume_nonce("bob", 50).await.unwrap(), (true, REASON_OK));
    }

    #[tokio::test]
    async fn independent_senders_do_not_share_counters() {
        let store = NonceStore::memory_only(100);
        store.verify_and_consume_nonce("alice", 5).await.unwrap();
        assert_eq!(store.verify_and_consume_nonce("bob", 1).await.unwrap(), (true, REASON_OK));
    }
}
