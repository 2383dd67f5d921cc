//! Process-wide circuit breaker registry (§4.2 "Registry").

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, CircuitStatus};

/// Name → breaker map, created lazily. A per-name creation lock avoids two
/// concurrent callers racing to construct the same breaker with different
/// configs.
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    creation_lock: Mutex<()>,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self {
            breakers: DashMap::new(),
            creation_lock: Mutex::new(()),
        }
    }

    pub async fn get_or_create(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return existing.clone();
        }
        let _guard = self.creation_lock.lock().await;
        if let Some(existing) = self.breakers.get(name) {
            return existing.clone();
        }
        let breaker = Arc::new(CircuitBreaker::new(name, config));
        self.breakers.insert(name.to_string(), breaker.clone());
        breaker
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| entry.clone())
    }

    pub fn remove(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.remove(name).map(|(_, breaker)| breaker)
    }

    pub fn list_all(&self) -> Vec<String> {
        self.breakers.iter().map(|entry| entry.key().clone()).collect()
    }

    pub async fn get_all_status(&self) -> Vec<CircuitStatus> {
        let mut statuses = Vec::with_capacity(self.breakers.len());
        for entry in self.breakers.iter() {
            statuses.push(entry.value().status().await);
        }
        statuses
    }

    pub async fn get_open_circuits(&self) -> Vec<String> {
        let mut open = Vec::new();
        for entry in self.breakers.iter() {
            if entry.value().state().await == CircuitState::Open {
                open.push(entry.key().clone());
            }
        }
        open
    }

    /// Fraction of known breakers currently CLOSED.
    pub async fn get_health_summary(&self) -> f64 {
        let total = self.breakers.len();
        if total == 0 {
            return 1.0;
        }
        let mut closed = 0usize;
        for entry in self.breakers.iter() {
            if entry.value().state().await == CircuitState::Closed {
                closed += 1;
            }
        }
        closed as f64 / total as f64
    }

    pub async fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let registry = CircuitBreakerRegistry::new();
        let a = registry.get_or_create("neo4j", CircuitBreakerConfig::default()).await;
        let b = registry.get_or_create("neo4j", CircuitBreakerConfig::default()).await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn health_summary_is_full_with_no_breakers() {
        let registry = CircuitBreakerRegistry::new();
        assert_eq!(registry.get_health_summary().await, 1.0);
    }

    #[tokio::test]
    async fn health_summary_reflects_open_circuits() {
        let registry = CircuitBreakerRegistry::new();
        let cb = registry
            .get_or_create(
                "webhook",
                CircuitBreakerConfig {
                    failure_threshold: 1,
                    min_calls_for_rate: usize::MAX,
                    ..Default::default()
                },
            )
            .await;
        cb.force_open(None).await;
        assert_eq!(registry.get_open_circuits().await, vec!["webhook".to_string()]);
        assert_eq!(registry.get_health_summary().await, 0.0);
    }
}
