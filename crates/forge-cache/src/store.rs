//! The two-tier query cache (§4.4).

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use forge_core::{KvBackend, TieredKv};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::CacheError;
use crate::key::{capsule_key, clamp_depth, lineage_key, sanitize_component, search_key};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    value: serde_json::Value,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    query_type: String,
}

pub struct CacheConfigPatterns {
    pub global_prefix: String,
    pub capsule_key_pattern: String,
    pub lineage_key_pattern: String,
    pub search_key_pattern: String,
    pub default_ttl: Duration,
    pub lineage_ttl: Duration,
    pub search_ttl: Duration,
    pub max_cached_result_bytes: usize,
}

impl Default for CacheConfigPatterns {
    fn default() -> Self {
        Self {
            global_prefix: "forge:".to_string(),
            capsule_key_pattern: "forge:capsule:{id}".to_string(),
            lineage_key_pattern: "forge:lineage:{id}:{depth}".to_string(),
            search_key_pattern: "forge:search:{query_hash}".to_string(),
            default_ttl: Duration::from_secs(300),
            lineage_ttl: Duration::from_secs(1800),
            search_ttl: Duration::from_secs(300),
            max_cached_result_bytes: 1_048_576,
        }
    }
}

pub struct QueryCache {
    backend: TieredKv,
    patterns: CacheConfigPatterns,
    reverse_index: DashMap<String, HashSet<String>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QueryCache {
    pub fn new(backend: TieredKv, patterns: CacheConfigPatterns) -> Self {
        Self {
            backend,
            patterns,
            reverse_index: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn memory_only(max_entries: usize) -> Self {
        Self::new(TieredKv::memory_only(max_entries), CacheConfigPatterns::default())
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, CacheError> {
        match self.backend.get(key).await? {
            Some(bytes) => match serde_json::from_slice::<StoredEntry>(&bytes) {
                Ok(entry) if entry.expires_at > Utc::now() => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    Ok(Some(entry.value))
                }
                _ => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    Ok(None)
                }
            },
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, value))]
    pub async fn set(&self, key: &str, value: serde_json::Value, ttl: Duration, query_type: impl Into<String>, related_capsule_ids: &[String]) -> Result<(), CacheError> {
        let now = Utc::now();
        let entry = StoredEntry {
            value,
            created_at: now,
            expires_at: now + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(0)),
            query_type: query_type.into(),
        };
        let bytes = serde_json::to_vec(&entry)?;
        if bytes.len() > self.patterns.max_cached_result_bytes {
            return Err(CacheError::ValueTooLarge { actual: bytes.len(), limit: self.patterns.max_cached_result_bytes });
        }
        self.backend.set(key, bytes, Some(ttl)).await?;
        for capsule_id in related_capsule_ids {
            let sanitized = sanitize_component(capsule_id);
            self.reverse_index.entry(sanitized).or_default().insert(key.to_string());
        }
        Ok(())
    }

    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        compute: F,
        ttl: Duration,
        query_type: impl Into<String>,
        related_capsule_ids: &[String],
    ) -> Result<serde_json::Value, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<serde_json::Value, CacheError>>,
    {
        if let Some(cached) = self.get(key).await? {
            return Ok(cached);
        }
        let value = compute().await?;
        if let Err(e) = self.set(key, value.clone(), ttl, query_type, related_capsule_ids).await {
            tracing::warn!(error = %e, "failed to populate cache after compute");
        }
        Ok(value)
    }

    pub fn capsule_key(&self, capsule_id: &str) -> String {
        capsule_key(&self.patterns.capsule_key_pattern, capsule_id)
    }

    pub async fn get_or_compute_lineage<F, Fut>(&self, capsule_id: &str, depth: u32, compute: F) -> Result<Vec<serde_json::Value>, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<serde_json::Value>, CacheError>>,
    {
        let depth = clamp_depth(depth);
        let key = lineage_key(&self.patterns.lineage_key_pattern, capsule_id, depth);

        if let Some(cached) = self.get(&key).await? {
            if let Ok(items) = serde_json::from_value::<Vec<serde_json::Value>>(cached) {
                return Ok(items);
            }
        }

        let items = compute().await?;
        let ttl = lineage_ttl_heuristic(freshest_updated_at(&items), self.patterns.lineage_ttl);
        let related = vec![capsule_id.to_string()];
        if let Err(e) = self.set(&key, serde_json::Value::Array(items.clone()), ttl, "lineage", &related).await {
            tracing::warn!(error = %e, "failed to populate lineage cache after compute");
        }
        Ok(items)
    }

    pub async fn get_or_compute_search<F, Fut>(&self, query: &str, filters: &serde_json::Value, compute: F) -> Result<serde_json::Value, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<serde_json::Value, CacheError>>,
    {
        let key = search_key(&self.patterns.search_key_pattern, query, filters);
        if let Some(cached) = self.get(&key).await? {
            return Ok(cached);
        }
        let value = compute().await?;
        if let Err(e) = self.set(&key, value.clone(), self.patterns.search_ttl, "search", &[]).await {
            tracing::warn!(error = %e, "failed to populate search cache after compute");
        }
        Ok(value)
    }

    #[instrument(skip(self))]
    pub async fn invalidate_for_capsule(&self, capsule_id: &str) -> Result<usize, CacheError> {
        let sanitized = sanitize_component(capsule_id);
        let Some((_, keys)) = self.reverse_index.remove(&sanitized) else {
            return Ok(0);
        };
        let mut count = 0;
        for key in keys {
            if self.backend.delete(&key).await? {
                count += 1;
            }
        }
        Ok(count)
    }

    pub async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        for mut entry in self.reverse_index.iter_mut() {
            entry.value_mut().remove(key);
        }
        Ok(self.backend.delete(key).await?)
    }

    pub async fn clear_all(&self) -> Result<usize, CacheError> {
        let count = self.backend.clear_prefix(&self.patterns.global_prefix).await?;
        self.reverse_index.clear();
        Ok(count)
    }
}

/// §4.4 lineage TTL heuristic: fresher data gets a shorter TTL.
pub fn lineage_ttl_heuristic(freshest_updated_at: Option<DateTime<Utc>>, fallback: Duration) -> Duration {
    let Some(updated_at) = freshest_updated_at else {
        return fallback;
    };
    let age = Utc::now() - updated_at;
    if age < chrono::Duration::hours(1) {
        Duration::from_secs(60)
    } else if age < chrono::Duration::hours(24) {
        Duration::from_secs(300)
    } else if age < chrono::Duration::weeks(1) {
        Duration::from_secs(1800)
    } else {
        Duration::from_secs(3600)
    }
}

fn freshest_updated_at(items: &[serde_json::Value]) -> Option<DateTime<Utc>> {
    items
        .iter()
        .filter_map(|v| v.get("updated_at").and_then(|f| f.as_str()))
        .filter_map(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cache = QueryCache::memory_only(100);
        cache.set("k1", serde_json::json!({"a": 1}), Duration::from_secs(60), "capsule", &[]).await.unwrap();
        let value = cache.get("k1").await.unwrap();
        assert_eq!(value, Some(serde_json::json!({"a": 1})));
    }

    #[tokio::test]
    async fn get_on_a_missing_key_is_a_miss() {
        let cache = QueryCache::memory_only(100);
        assert_eq!(cache.get("nope").await.unwrap(), None);
        assert_eq!(cache.misses(), 1);
    }

    #[tokio::test]
    async fn oversized_values_are_rejected() {
        let cache = QueryCache::new(
            TieredKv::memory_only(100),
            CacheConfigPatterns { max_cached_result_bytes: 8, ..Default::default() },
        );
        let err = cache.set("k1", serde_json::json!({"big": "value too long"}), Duration::from_secs(60), "capsule", &[]).await.unwrap_err();
        assert!(matches!(err, CacheError::ValueTooLarge { .. }));
    }

    #[tokio::test]
    async fn invalidate_for_capsule_removes_bound_keys() {
        let cache = QueryCache::memory_only(100);
        cache.set("k1", serde_json::json!(1), Duration::from_secs(60), "capsule", &["c1".to_string()]).await.unwrap();
        cache.set("k2", serde_json::json!(2), Duration::from_secs(60), "lineage", &["c1".to_string()]).await.unwrap();
        let removed = cache.invalidate_for_capsule("c1").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(cache.get("k1").await.unwrap(), None);
        assert_eq!(cache.get("k2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn get_or_compute_only_computes_once() {
        let cache = QueryCache::memory_only(100);
        let calls = std::sync::atomic::AtomicU64::new(0);
        for _ in 0..3 {
            cache
                .get_or_compute(
                    "k1",
                    || async {
                        calls.fetch_add(1, Ordering::Relaxed);
                        Ok(serde_json::json!("computed"))
                    },
                    Duration::from_secs(60),
                    "capsule",
                    &[],
                )
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn clear_all_drops_everything_under_the_prefix() {
        let cache = QueryCache::memory_only(100);
        cache.set("forge:capsule:a", serde_json::json!(1), Duration::from_secs(60), "capsule", &[]).await.unwrap();
        let removed = cache.clear_all().await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(cache.get("forge:capsule:a").await.unwrap(), None);
    }

    #[test]
    fn lineage_ttl_heuristic_uses_freshness_bands() {
        let now = Utc::now();
        assert_eq!(lineage_ttl_heuristic(Some(now), Duration::from_secs(1800)), Duration::from_secs(60));
        assert_eq!(lineage_ttl_heuristic(Some(now - chrono::Duration::hours(5)), Duration::from_secs(1800)), Duration::from_secs(300));
        assert_eq!(lineage_ttl_heuristic(Some(now - chrono::Duration::days(3)), Duration::from_secs(1800)), Duration::from_secs(1800));
        assert_eq!(lineage_ttl_heuristic(Some(now - chrono::Duration::weeks(2)), Duration::from_secs(1800)), Duration::from_secs(3600));
        assert_eq!(lineage_ttl_heuristic(None, Duration::from_secs(99)), Duration::from_secs(99));
    }
}
