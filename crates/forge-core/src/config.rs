//! Recognized configuration surface (§6).
//!
//! Loading from environment or a config file is left to the embedding
//! binary; this module only defines the shape and the numeric defaults that
//! the rest of the crate family is built against. `ForgeConfig::default()` is
//! always valid, so every component can be constructed in tests with no
//! external input.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
    pub session: SessionConfig,
    pub nonce: NonceConfig,
    pub circuit_breakers: HashMap<String, CircuitBreakerDefaults>,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            scheduler: SchedulerConfig::default(),
            session: SessionConfig::default(),
            nonce: NonceConfig::default(),
            circuit_breakers: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub redis_url: Option<String>,
    pub default_ttl_seconds: u64,
    pub search_ttl_seconds: u64,
    pub lineage_ttl_seconds: u64,
    pub max_cached_result_bytes: usize,
    pub capsule_key_pattern: String,
    pub lineage_key_pattern: String,
    pub search_key_pattern: String,
    pub query_cache_cleanup_interval_minutes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redis_url: None,
            default_ttl_seconds: 300,
            search_ttl_seconds: 300,
            lineage_ttl_seconds: 1800,
            max_cached_result_bytes: 1_048_576,
            capsule_key_pattern: "forge:capsule:{id}".to_string(),
            lineage_key_pattern: "forge:lineage:{id}:{depth}".to_string(),
            search_key_pattern: "forge:search:{query_hash}".to_string(),
            query_cache_cleanup_interval_minutes: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub graph_snapshot_enabled: bool,
    pub graph_snapshot_interval_minutes: u64,
    pub version_compaction_enabled: bool,
    pub version_compaction_interval_hours: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            graph_snapshot_enabled: true,
            graph_snapshot_interval_minutes: 60,
            version_compaction_enabled: true,
            version_compaction_interval_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub cache_enabled: bool,
    pub cache_ttl_seconds: u64,
    pub max_ip_history_per_session: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_ttl_seconds: 900,
            max_ip_history_per_session: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NonceConfig {
    pub key_prefix: String,
    pub ttl_seconds: u64,
    pub max_memory_entries: usize,
}

impl Default for NonceConfig {
    fn default() -> Self {
        Self {
            key_prefix: "forge:acp:nonce:".to_string(),
            ttl_seconds: 300,
            max_memory_entries: 100_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerDefaults {
    pub failure_threshold: u32,
    pub failure_rate_threshold: f64,
    pub window_size: usize,
    pub min_calls_for_rate: usize,
    pub success_threshold: u32,
    pub recovery_timeout: Duration,
    pub call_timeout: Duration,
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerDefaults {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_rate_threshold: 0.5,
            window_size: 10,
            min_calls_for_rate: 5,
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(30),
            call_timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_json() {
        let cfg = ForgeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ForgeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.cache.default_ttl_seconds, cfg.cache.default_ttl_seconds);
        assert_eq!(back.session.max_ip_history_per_session, 10);
    }
}
