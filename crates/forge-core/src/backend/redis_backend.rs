//! Redis-compatible [`KvBackend`] (§6 "Cache backend").
//!
//! Wraps a [`redis::aio::ConnectionManager`], which already reconnects
//! transparently on a dropped connection, so this type only needs to
//! translate `KvBackend` calls into `GET`/`SETEX`/`DEL`/`SCAN` and map
//! `redis::RedisError` into [`KvError`]. Callers needing the "fall through to
//! memory on error" behaviour wrap this in [`super::tiered::TieredKv`] rather
//! than handling it here.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use crate::traits::{KvBackend, KvError};

/// Outcome of [`RedisKv::compare_and_swap_nonce`] (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceCasOutcome {
    /// No nonce was recorded yet, or `candidate` was greater: it is now the
    /// stored value.
    Advanced,
    /// `candidate` equals the nonce already stored: a replay.
    Replay,
    /// `candidate` is less than the nonce already stored.
    Stale,
}

/// Compares-and-advances the nonce at `KEYS[1]` in one round trip so the
/// check and the set can never interleave with another caller's, in this
/// process or any other sharing the same Redis instance (§4.3, §5:
/// "Lua/transaction on Redis"). `ARGV[1]` is the candidate nonce as a
/// zero-padded, fixed-width decimal string rather than a native Lua number:
/// Lua represents all numbers as 64-bit floats, which cannot exactly
/// represent every `u64`, but equal-length zero-padded decimal strings
/// compare correctly byte-for-byte under plain string comparison.
const COMPARE_AND_SWAP_NONCE_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current == false then
    redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[2])
    return 2
end
if ARGV[1] > current then
    redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[2])
    return 2
elseif ARGV[1] == current then
    return 1
else
    return 0
end
"#;

pub struct RedisKv {
    manager: ConnectionManager,
}

impl RedisKv {
    /// Connect eagerly so construction fails fast if the URL is malformed;
    /// the `ConnectionManager` itself tolerates the server being briefly
    /// unreachable afterward and reconnects in the background.
    pub async fn connect(url: &str) -> Result<Self, KvError> {
        let client = redis::Client::open(url).map_err(|e| KvError::Unavailable(e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| KvError::Unavailable(e.to_string()))?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl KvBackend for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let mut conn = self.manager.clone();
        conn.get(key).await.map_err(|e| KvError::OperationFailed(e.to_string()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        match ttl {
            Some(ttl) => {
                let seconds = ttl.as_secs().max(1);
                conn.set_ex::<_, _, ()>(key, value, seconds)
                    .await
                    .map_err(|e| KvError::OperationFailed(e.to_string()))
            }
            None => conn
                .set::<_, _, ()>(key, value)
                .await
                .map_err(|e| KvError::OperationFailed(e.to_string())),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        let mut conn = self.manager.clone();
        let removed: i64 = conn.del(key).await.map_err(|e| KvError::OperationFailed(e.to_string()))?;
        Ok(removed > 0)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        let mut conn = self.manager.clone();
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await
                .map_err(|e| KvError::OperationFailed(e.to_string()))?;
            keys.extend(batch);
            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }
        Ok(keys)
    }

    async fn clear_prefix(&self, prefix: &str) -> Result<usize, KvError> {
        let keys = self.scan_prefix(prefix).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.manager.clone();
        let removed: i64 = conn.del(&keys).await.map_err(|e| KvError::OperationFailed(e.to_string()))?;
        Ok(removed as usize)
    }
}

impl RedisKv {
    /// Atomic nonce compare-and-advance; see [`NonceCasOutcome`].
    pub async fn compare_and_swap_nonce(&self, key: &str, candidate: u64, ttl: Duration) -> Result<NonceCasOutcome, KvError> {
        let mut conn = self.manager.clone();
        let padded = format!("{candidate:020}");
        let seconds = ttl.as_secs().max(1);
        let code: i64 = Script::new(COMPARE_AND_SWAP_NONCE_SCRIPT)
            .key(key)
            .arg(padded)
            .arg(seconds)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| KvError::OperationFailed(e.to_string()))?;
        match code {
            2 => Ok(NonceCasOutcome::Advanced),
            1 => Ok(NonceCasOutcome::Replay),
            _ => Ok(NonceCasOutcome::Stale),
        }
    }
}
