//! Time abstraction for testability.
//!
//! Circuit-breaker recovery windows, nonce TTLs, and scheduler jitter are all
//! expressed against this trait rather than `Instant::now()`/`Utc::now()`
//! directly, so tests can drive time deterministically instead of sleeping.

use std::future::Future;
use std::time::Instant;

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    /// Monotonic instant, used for recovery timeouts and window trimming.
    fn now(&self) -> Instant;

    /// Wall-clock time, used for timestamps that cross the wire (handshake
    /// freshness, session expiry, trust decay).
    fn now_utc(&self) -> DateTime<Utc>;

    /// Suspend the current task for `duration`.
    fn sleep(&self, duration: std::time::Duration) -> impl Future<Output = ()> + Send;
}

/// Real clock backed by the system and the monotonic OS clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: std::time::Duration) {
        tokio::time::sleep(duration).await;
    }
}
