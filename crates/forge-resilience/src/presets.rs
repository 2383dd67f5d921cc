//! Pre-configured breakers for the dependencies named in §4.2.

use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerConfig;

pub struct ForgeCircuits;

impl ForgeCircuits {
    pub fn neo4j() -> (&'static str, CircuitBreakerConfig) {
        (
            "neo4j",
            CircuitBreakerConfig {
                failure_threshold: 3,
                recovery_timeout: Duration::from_secs(30),
                call_timeout: Some(Duration::from_secs(10)),
                ..Default::default()
            },
        )
    }

    pub fn external_ml() -> (&'static str, CircuitBreakerConfig) {
        (
            "external_ml",
            CircuitBreakerConfig {
                failure_threshold: 5,
                recovery_timeout: Duration::from_secs(60),
                call_timeout: Some(Duration::from_secs(30)),
                ..Default::default()
            },
        )
    }

    pub fn overlay(name: &str) -> (String, CircuitBreakerConfig) {
        (
            format!("overlay_{name}"),
            CircuitBreakerConfig {
                failure_threshold: 5,
                recovery_timeout: Duration::from_secs(15),
                call_timeout: Some(Duration::from_secs(5)),
                ..Default::default()
            },
        )
    }

    pub fn webhook() -> (&'static str, CircuitBreakerConfig) {
        (
            "webhook",
            CircuitBreakerConfig {
                failure_threshold: 10,
                failure_rate_threshold: 0.7,
                recovery_timeout: Duration::from_secs(120),
                call_timeout: Some(Duration::from_secs(15)),
                ..Default::default()
            },
        )
    }
}
