//! Translates entity change events into cache operations (§4.5).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::DashSet;
use tokio::sync::Mutex;
use tracing::warn;

use crate::store::QueryCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationStrategy {
    Immediate,
    Debounced,
    Lazy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Default)]
pub struct InvalidatorStats {
    pub events_received: u64,
    pub events_processed: u64,
    pub entries_invalidated: u64,
    pub debounce_merges: u64,
    pub errors: u64,
}

type Callback = Arc<dyn Fn(&str, ChangeKind) + Send + Sync>;

pub struct CacheInvalidator {
    cache: Arc<QueryCache>,
    strategy: InvalidationStrategy,
    debounce_interval: Duration,
    pending: Mutex<HashMap<String, ChangeKind>>,
    stale: DashSet<String>,
    callbacks: DashMap<u64, Callback>,
    next_callback_id: AtomicU64,
    events_received: AtomicU64,
    events_processed: AtomicU64,
    entries_invalidated: AtomicU64,
    debounce_merges: AtomicU64,
    errors: AtomicU64,
}

impl CacheInvalidator {
    pub fn new(cache: Arc<QueryCache>, strategy: InvalidationStrategy, debounce_seconds: u64) -> Self {
        Self {
            cache,
            strategy,
            debounce_interval: Duration::from_secs(debounce_seconds),
            pending: Mutex::new(HashMap::new()),
            stale: DashSet::new(),
            callbacks: DashMap::new(),
            next_callback_id: AtomicU64::new(0),
            events_received: AtomicU64::new(0),
            events_processed: AtomicU64::new(0),
            entries_invalidated: AtomicU64::new(0),
            debounce_merges: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Registers a listener fired for every processed event. Panics inside
    /// the callback are caught and logged; they never interrupt invalidation.
    pub fn register_callback(&self, callback: impl Fn(&str, ChangeKind) + Send + Sync + 'static) -> u64 {
        let id = self.next_callback_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks.insert(id, Arc::new(callback));
        id
    }

    pub fn unregister_callback(&self, id: u64) {
        self.callbacks.remove(&id);
    }

    fn fire_callbacks(&self, capsule_id: &str, kind: ChangeKind) {
        for entry in self.callbacks.iter() {
            let callback = entry.value().clone();
            let capsule_id = capsule_id.to_string();
            if let Err(_panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (callback.as_ref())(&capsule_id, kind))) {
                warn!(capsule_id = %capsule_id, "cache invalidation callback panicked, ignoring");
            }
        }
    }

    pub async fn on_capsule_created(&self, capsule_id: &str) {
        self.handle_event(capsule_id, ChangeKind::Created).await;
    }

    pub async fn on_capsule_updated(&self, capsule_id: &str) {
        self.handle_event(capsule_id, ChangeKind::Updated).await;
    }

    pub async fn on_capsule_deleted(&self, capsule_id: &str) {
        self.handle_event(capsule_id, ChangeKind::Deleted).await;
    }

    pub async fn on_lineage_changed(&self, capsule_id: &str, parent_ids: &[String]) {
        self.handle_event(capsule_id, ChangeKind::Updated).await;
        for parent_id in parent_ids {
            self.handle_event(parent_id, ChangeKind::Updated).await;
        }
    }

    async fn handle_event(&self, capsule_id: &str, kind: ChangeKind) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
        self.fire_callbacks(capsule_id, kind);

        match self.strategy {
            InvalidationStrategy::Immediate => {
                self.invalidate_now(capsule_id).await;
            }
            InvalidationStrategy::Debounced => {
                let mut pending = self.pending.lock().await;
                if pending.insert(capsule_id.to_string(), kind).is_some() {
                    self.debounce_merges.fetch_add(1, Ordering::Relaxed);
                }
            }
            InvalidationStrategy::Lazy => {
                self.stale.insert(self.cache.capsule_key(capsule_id));
            }
        }
        self.events_processed.fetch_add(1, Ordering::Relaxed);
    }

    async fn invalidate_now(&self, capsule_id: &str) {
        match self.cache.invalidate_for_capsule(capsule_id).await {
            Ok(n) => {
                self.entries_invalidated.fetch_add(n as u64, Ordering::Relaxed);
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!(capsule_id, error = %e, "failed to invalidate cache entries");
            }
        }
    }

    /// Flushes all pending DEBOUNCED invalidations as one batch. Called
    /// periodically by the scheduler and once more at shutdown.
    pub async fn flush_debounced(&self) {
        let batch: Vec<String> = {
            let mut pending = self.pending.lock().await;
            pending.drain().map(|(id, _)| id).collect()
        };
        for capsule_id in batch {
            self.invalidate_now(&capsule_id).await;
        }
    }

    /// LAZY strategy: consumers must call this before trusting a cache hit.
    pub fn is_stale(&self, key: &str) -> bool {
        self.stale.contains(key)
    }

    pub fn clear_stale(&self, key: &str) {
        self.stale.remove(key);
    }

    pub fn strategy(&self) -> InvalidationStrategy {
        self.strategy
    }

    pub fn debounce_interval(&self) -> Duration {
        self.debounce_interval
    }

    pub fn get_stats(&self) -> InvalidatorStats {
        InvalidatorStats {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_processed: self.events_processed.load(Ordering::Relaxed),
            entries_invalidated: self.entries_invalidated.load(Ordering::Relaxed),
            debounce_merges: self.debounce_merges.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn immediate_strategy_invalidates_synchronously() {
        let cache = Arc::new(QueryCache::memory_only(100));
        cache.set("forge:capsule:c1", serde_json::json!(1), Duration::from_secs(60), "capsule", &["c1".to_string()]).await.unwrap();
        let invalidator = CacheInvalidator::new(cache.clone(), InvalidationStrategy::Immediate, 5);
        invalidator.on_capsule_updated("c1").await;
        assert_eq!(cache.get("forge:capsule:c1").await.unwrap(), None);
        assert_eq!(invalidator.get_stats().entries_invalidated, 1);
    }

    #[tokio::test]
    async fn debounced_strategy_merges_repeated_events() {
        let cache = Arc::new(QueryCache::memory_only(100));
        let invalidator = CacheInvalidator::new(cache, InvalidationStrategy::Debounced, 5);
        invalidator.on_capsule_updated("c1").await;
        invalidator.on_capsule_updated("c1").await;
        invalidator.on_capsule_deleted("c1").await;
        assert_eq!(invalidator.get_stats().debounce_merges, 2);
        assert_eq!(invalidator.get_stats().entries_invalidated, 0);
        invalidator.flush_debounced().await;
    }

    #[tokio::test]
    async fn lazy_strategy_marks_keys_stale_instead_of_deleting() {
        let cache = Arc::new(QueryCache::memory_only(100));
        cache.set("forge:capsule:c1", serde_json::json!(1), Duration::from_secs(60), "capsule", &["c1".to_string()]).await.unwrap();
        let invalidator = CacheInvalidator::new(cache.clone(), InvalidationStrategy::Lazy, 5);
        invalidator.on_capsule_updated("c1").await;
        assert!(invalidator.is_stale("forge:capsule:c1"));
        assert!(cache.get("forge:capsule:c1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn lineage_changed_invalidates_self_and_parents() {
        let cache = Arc::new(QueryCache::memory_only(100));
        cache.set("forge:capsule:child", serde_json::json!(1), Duration::from_secs(60), "capsule", &["child".to_string()]).await.unwrap();
        cache.set("forge:capsule:parent", serde_json::json!(1), Duration::from_secs(60), "capsule", &["parent".to_string()]).await.unwrap();
        let invalidator = CacheInvalidator::new(cache.clone(), InvalidationStrategy::Immediate, 5);
        invalidator.on_lineage_changed("child", &["parent".to_string()]).await;
        assert_eq!(cache.get("forge:capsule:child").await.unwrap(), None);
        assert_eq!(cache.get("forge:capsule:parent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn callback_panics_are_swallowed() {
        let cache = Arc::new(QueryCache::memory_only(100));
        let invalidator = CacheInvalidator::new(cache, InvalidationStrategy::Immediate, 5);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        invalidator.register_callback(move |_id, _kind| {
            fired_clone.fetch_add(1, Ordering::Relaxed);
            panic!("listener exploded");
        });
        invalidator.on_capsule_created("c1").await;
        assert_eq!(fired.load(Ordering::Relaxed), 1);
        assert_eq!(invalidator.get_stats().events_processed, 1);
    }
}
