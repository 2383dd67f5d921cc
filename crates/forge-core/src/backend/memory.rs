//! Bounded in-memory [`KvBackend`] (§5 "Bounded memory", §9).
//!
//! Used standalone when no Redis endpoint is configured, and as the fallback
//! half of [`super::tiered::TieredKv`]. Every entry carries its own
//! expiration; the map itself is capped at `max_entries` with LRU-by-last-
//! touch eviction, touching a key on both `get` and `set`. This is the
//! nonce store's "last-touched timestamp" (§3.7) made concrete, and is also
//! a faithful reading of the session cache's "oldest-first eviction": the
//! entry evicted is whichever key nothing has read or written in longest.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::traits::{KvBackend, KvError};

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(t) if t <= now)
    }
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    /// Recency order, least-recently-touched first. A touch (`get` hit or
    /// `set`) moves the key to the back; eviction pops the front.
    order: VecDeque<String>,
}

impl State {
    /// Moves `key` to the most-recently-touched end of `order`.
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.order.push_back(key.to_string());
    }
}

pub struct MemoryKv {
    max_entries: usize,
    state: Mutex<State>,
}

impl MemoryKv {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            state: Mutex::new(State::default()),
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop entries whose TTL has passed. The Redis-backed tier relies on
    /// server-side TTL for this (§4.3); the in-memory tier needs an explicit
    /// sweep, invoked by the scheduler's query-cache-cleanup task (§4.6).
    pub async fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.entries.remove(key);
            state.order.retain(|k| k != key);
        }
        expired.len()
    }

    fn evict_if_over_capacity(state: &mut State, max_entries: usize) {
        while state.entries.len() > max_entries {
            let Some(oldest) = state.order.pop_front() else { break };
            state.entries.remove(&oldest);
        }
    }
}

#[async_trait]
impl KvBackend for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        if let Some(entry) = state.entries.get(key) {
            if entry.is_expired(now) {
                state.entries.remove(key);
                state.order.retain(|k| k != key);
                return Ok(None);
            }
            let value = entry.value.clone();
            state.touch(key);
            return Ok(Some(value));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), KvError> {
        let mut state = self.state.lock().await;
        let expires_at = ttl.map(|d| Instant::now() + d);
        state.entries.insert(key.to_string(), Entry { value, expires_at });
        state.touch(key);
        let max_entries = self.max_entries;
        Self::evict_if_over_capacity(&mut state, max_entries);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        let mut state = self.state.lock().await;
        let removed = state.entries.remove(key).is_some();
        if removed {
            state.order.retain(|k| k != key);
        }
        Ok(removed)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        let state = self.state.lock().await;
        let now = Instant::now();
        Ok(state
            .entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn clear_prefix(&self, prefix: &str) -> Result<usize, KvError> {
        let mut state = self.state.lock().await;
        let matching: Vec<String> = state
            .entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        for key in &matching {
            state.entries.remove(key);
            state.order.retain(|k| k != key);
        }
        Ok(matching.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let kv = MemoryKv::new(10);
        kv.set("a", b"1".to_vec(), None).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn expired_entry_reads_as_absent() {
        let kv = MemoryKv::new(10);
        kv.set("a", b"1".to_vec(), Some(Duration::from_millis(1))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(kv.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn capacity_evicts_oldest_first() {
        let kv = MemoryKv::new(2);
        kv.set("a", b"1".to_vec(), None).await.unwrap();
        kv.set("b", b"2".to_vec(), None).await.unwrap();
        kv.set("c", b"3".to_vec(), None).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), None);
        assert_eq!(kv.get("b").await.unwrap(), Some(b"2".to_vec()));
        assert_eq!(kv.get("c").await.unwrap(), Some(b"3".to_vec()));
        assert_eq!(kv.len().await, 2);
    }

    #[tokio::test]
    async fn a_read_touch_protects_a_key_from_eviction() {
        let kv = MemoryKv::new(2);
        kv.set("a", b"1".to_vec(), None).await.unwrap();
        kv.set("b", b"2".to_vec(), None).await.unwrap();
        // Touching "a" makes "b" the least-recently-touched key.
        assert_eq!(kv.get("a").await.unwrap(), Some(b"1".to_vec()));
        kv.set("c", b"3".to_vec(), None).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(kv.get("b").await.unwrap(), None);
        assert_eq!(kv.get("c").await.unwrap(), Some(b"3".to_vec()));
    }

    #[tokio::test]
    async fn scan_and_clear_prefix() {
        let kv = MemoryKv::new(10);
        kv.set("forge:a:1", b"x".to_vec(), None).await.unwrap();
        kv.set("forge:a:2", b"y".to_vec(), None).await.unwrap();
        kv.set("forge:b:1", b"z".to_vec(), None).await.unwrap();

        let mut matched = kv.scan_prefix("forge:a:").await.unwrap();
        matched.sort();
        assert_eq!(matched, vec!["forge:a:1".to_string(), "forge:a:2".to_string()]);

        let cleared = kv.clear_prefix("forge:a:").await.unwrap();
        assert_eq!(cleared, 2);
        assert!(kv.scan_prefix("forge:a:").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cleanup_expired_sweeps_stale_entries() {
        let kv = MemoryKv::new(10);
        kv.set("a", b"1".to_vec(), Some(Duration::from_millis(1))).await.unwrap();
        kv.set("b", b"2".to_vec(), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(kv.cleanup_expired().await, 1);
        assert_eq!(kv.len().await, 1);
    }
}
