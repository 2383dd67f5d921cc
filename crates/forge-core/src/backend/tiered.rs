//! Redis-preferred, memory-fallback [`KvBackend`] (§4.3, §4.4, §4.9, §9).
//!
//! Every subsystem with a pluggable backend ("Redis-compatible client if
//! available, else process memory... on Redis errors, fall through to
//! memory") wants the same tiering, so it lives once here. A call tries
//! Redis first when configured; a connect failure at construction time, or
//! an operation error at call time, falls through to the in-memory tier for
//! that single operation rather than failing the caller.

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::backend::redis_backend::NonceCasOutcome;
use crate::backend::{MemoryKv, RedisKv};
use crate::traits::{KvBackend, KvError};

pub struct TieredKv {
    redis: Option<RedisKv>,
    memory: MemoryKv,
}

impl TieredKv {
    pub fn new(redis: Option<RedisKv>, memory: MemoryKv) -> Self {
        Self { redis, memory }
    }

    /// Memory-only, for tests and for deployments with no Redis endpoint
    /// configured at all (§6: "if unset or unreachable, memory-only").
    pub fn memory_only(max_entries: usize) -> Self {
        Self {
            redis: None,
            memory: MemoryKv::new(max_entries),
        }
    }

    /// Attempt a Redis connection; on failure, log and fall back to
    /// memory-only rather than failing construction, matching §4.4's "on
    /// connect failure... the cache silently uses memory".
    pub async fn connect(redis_url: Option<&str>, max_memory_entries: usize) -> Self {
        let redis = match redis_url {
            Some(url) => match RedisKv::connect(url).await {
                Ok(client) => Some(client),
                Err(e) => {
                    warn!(error = %e, "redis unreachable at startup, falling back to memory-only");
                    None
                }
            },
            None => None,
        };
        Self {
            redis,
            memory: MemoryKv::new(max_memory_entries),
        }
    }

    pub fn memory(&self) -> &MemoryKv {
        &self.memory
    }

    pub fn using_redis(&self) -> bool {
        self.redis.is_some()
    }

    /// Nonce compare-and-advance (§4.3), atomic on whichever tier actually
    /// serves the call. The Redis tier uses a single Lua script server-side,
    /// so it is atomic across every process sharing that Redis instance; the
    /// memory tier has no server to run a script on, so it relies on the
    /// caller serializing concurrent calls with its own process-local lock
    /// (§5: "process lock for memory backend; Lua/transaction on Redis").
    pub async fn verify_and_consume_nonce(&self, key: &str, candidate: u64, ttl: Duration) -> Result<NonceCasOutcome, KvError> {
        if let Some(redis) = &self.redis {
            match redis.compare_and_swap_nonce(key, candidate, ttl).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => warn!(error = %e, "redis nonce compare-and-swap failed, falling back to memory"),
            }
        }
        self.memory_verify_and_consume_nonce(key, candidate, ttl).await
    }

    async fn memory_verify_and_consume_nonce(&self, key: &str, candidate: u64, ttl: Duration) -> Result<NonceCasOutcome, KvError> {
        let highest = match self.memory.get(key).await? {
            Some(bytes) if bytes.len() == 8 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&bytes);
                Some(u64::from_be_bytes(buf))
            }
            _ => None,
        };
        match highest {
            None => {
                self.memory.set(key, candidate.to_be_bytes().to_vec(), Some(ttl)).await?;
                Ok(NonceCasOutcome::Advanced)
            }
            Some(h) if candidate > h => {
                self.memory.set(key, candidate.to_be_bytes().to_vec(), Some(ttl)).await?;
                Ok(NonceCasOutcome::Advanced)
            }
            Some(h) if candidate == h => Ok(NonceCasOutcome::Replay),
            Some(_) => Ok(NonceCasOutcome::Stale),
        }
    }
}

#[async_trait]
impl KvBackend for TieredKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        if let Some(redis) = &self.redis {
            match redis.get(key).await {
                Ok(value) => return Ok(value),
                Err(e) => warn!(error = %e, "redis get failed, falling back to memory"),
            }
        }
        self.memory.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), KvError> {
        if let Some(redis) = &self.redis {
            match redis.set(key, value.clone(), ttl).await {
                Ok(()) => return Ok(()),
                Err(e) => warn!(error = %e, "redis set failed, falling back to memory"),
            }
        }
        self.memory.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        if let Some(redis) = &self.redis {
            match redis.delete(key).await {
                Ok(removed) => return Ok(removed),
                Err(e) => warn!(error = %e, "redis delete failed, falling back to memory"),
            }
        }
        self.memory.delete(key).await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        if let Some(redis) = &self.redis {
            match redis.scan_prefix(prefix).await {
                Ok(keys) => return Ok(keys),
                Err(e) => warn!(error = %e, "redis scan failed, falling back to memory"),
            }
        }
        self.memory.scan_prefix(prefix).await
    }

    async fn clear_prefix(&self, prefix: &str) -> Result<usize, KvError> {
        if let Some(redis) = &self.redis {
            match redis.clear_prefix(prefix).await {
                Ok(count) => return Ok(count),
                Err(e) => warn!(error = %e, "redis clear failed, falling back to memory"),
            }
        }
        self.memory.clear_prefix(prefix).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_only_round_trips() {
        let kv = TieredKv::memory_only(10);
        assert!(!kv.using_redis());
        kv.set("k", b"v".to_vec(), None).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn connect_with_no_url_is_memory_only() {
        let kv = TieredKv::connect(None, 10).await;
        assert!(!kv.using_redis());
    }

    #[tokio::test]
    async fn connect_with_unreachable_url_falls_back_to_memory() {
        let kv = TieredKv::connect(Some("redis://127.0.0.1:1"), 10).await;
        assert!(!kv.using_redis());
        kv.set("k", b"v".to_vec(), None).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn memory_nonce_compare_and_swap_advances_on_a_greater_candidate() {
        let kv = TieredKv::memory_only(10);
        let ttl = Duration::from_secs(60);
        assert_eq!(kv.verify_and_consume_nonce("n", 5, ttl).await.unwrap(), NonceCasOutcome::Advanced);
        assert_eq!(kv.verify_and_consume_nonce("n", 5, ttl).await.unwrap(), NonceCasOutcome::Replay);
        assert_eq!(kv.verify_and_consume_nonce("n", 3, ttl).await.unwrap(), NonceCasOutcome::Stale);
        assert_eq!(kv.verify_and_consume_nonce("n", 6, ttl).await.unwrap(), NonceCasOutcome::Advanced);
    }
}
