//! Per-dependency circuit breaker (§3.6, §4.2).
//!
//! CLOSED admits every call and watches a sliding window of outcomes. OPEN
//! rejects every call until `recovery_timeout` has elapsed on the monotonic
//! clock. HALF_OPEN admits a bounded number of trial calls; any failure
//! sends it straight back to OPEN, `success_threshold` consecutive successes
//! close it.

use std::future::Future;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::error::{CallError, CircuitBreakerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub failure_rate_threshold: f64,
    pub recovery_timeout: Duration,
    pub half_open_max_calls: u32,
    pub window_size: usize,
    pub min_calls_for_rate: usize,
    pub success_threshold: u32,
    pub call_timeout: Option<Duration>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_rate_threshold: 0.5,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
            window_size: 10,
            min_calls_for_rate: 5,
            success_threshold: 2,
            call_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// A single CLOSED → OPEN → HALF_OPEN transition, for the ordered state-change
/// log (§3.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateChange {
    pub from: CircuitState,
    pub to: CircuitState,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Stats {
    total_calls: u64,
    successful_calls: u64,
    failed_calls: u64,
    rejected_calls: u64,
    timeout_calls: u64,
    recent_successes: Vec<Instant>,
    recent_failures: Vec<Instant>,
    state_changes: Vec<StateChange>,
    last_failure_time: Option<DateTime<Utc>>,
    last_success_time: Option<DateTime<Utc>>,
    opened_at: Option<Instant>,
    half_open_successes: u32,
    half_open_failures: u32,
}

impl Stats {
    fn failure_rate(&self) -> f64 {
        let total = self.recent_successes.len() + self.recent_failures.len();
        if total == 0 {
            0.0
        } else {
            self.recent_failures.len() as f64 / total as f64
        }
    }

    fn trim_window(&mut self, window_size: usize) {
        while self.recent_successes.len() + self.recent_failures.len() > window_size {
            let oldest_success = self.recent_successes.first().copied();
            let oldest_failure = self.recent_failures.first().copied();
            match (oldest_success, oldest_failure) {
                (Some(s), Some(f)) if s <= f => {
                    self.recent_successes.remove(0);
                }
                (Some(_), Some(_)) => {
                    self.recent_failures.remove(0);
                }
                (Some(_), None) => {
                    self.recent_successes.remove(0);
                }
                (None, Some(_)) => {
                    self.recent_failures.remove(0);
                }
                (None, None) => break,
            }
        }
    }

    fn reset_window(&mut self) {
        self.recent_successes.clear();
        self.recent_failures.clear();
    }

    fn reset_half_open(&mut self) {
        self.half_open_successes = 0;
        self.half_open_failures = 0;
    }
}

/// Point-in-time snapshot returned by [`CircuitBreaker::status`]. Unlike the
/// internal [`Stats`], this is `Clone + Serialize` and carries no lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitStatus {
    pub name: String,
    pub state: CircuitState,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    pub timeout_calls: u64,
    pub failure_rate: f64,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub half_open_successes: u32,
    pub half_open_failures: u32,
}

struct Inner {
    state: CircuitState,
    stats: Stats,
}

type Listener = Box<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    listeners: StdMutex<Vec<Listener>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                stats: Stats::default(),
            }),
            listeners: StdMutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Register a callback invoked with `(old, new)` on every state
    /// transition. Per §4.2, listener panics must never affect breaker
    /// semantics; callers should keep listeners infallible.
    pub fn on_state_change<F>(&self, listener: F)
    where
        F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.listeners.lock().unwrap().push(Box::new(listener));
    }

    fn notify_listeners(&self, from: CircuitState, to: CircuitState) {
        for listener in self.listeners.lock().unwrap().iter() {
            listener(from, to);
        }
    }

    /// Execute `f` through the breaker. `is_excluded` classifies an inner
    /// error as a business-level negative answer rather than a dependency
    /// failure (§4.2 step 4); such errors count as successes.
    #[instrument(skip(self, f, is_excluded), fields(breaker = %self.name))]
    pub async fn call<F, Fut, T, E>(
        &self,
        is_excluded: impl Fn(&E) -> bool,
        f: F,
    ) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.admit().await?;

        let outcome = match self.config.call_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, f()).await {
                Ok(result) => result,
                Err(_) => {
                    self.record_timeout().await;
                    return Err(CallError::Timeout);
                }
            },
            None => f().await,
        };

        match outcome {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(error) => {
                if is_excluded(&error) {
                    self.record_success().await;
                } else {
                    self.record_failure().await;
                }
                Err(CallError::Inner(error))
            }
        }
    }

    /// Check and, if necessary, perform the OPEN → HALF_OPEN transition, and
    /// report whether a call should be admitted right now.
    async fn admit(&self) -> Result<bool, CircuitBreakerError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        let admitted = match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let opened_at = inner.stats.opened_at.unwrap_or(now);
                if now.duration_since(opened_at) >= self.config.recovery_timeout {
                    inner.stats.reset_half_open();
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                let in_flight = inner.stats.half_open_successes + inner.stats.half_open_failures;
                in_flight < self.config.half_open_max_calls
            }
        };

        inner.stats.total_calls += 1;
        if admitted {
            Ok(true)
        } else {
            inner.stats.rejected_calls += 1;
            let recovery_time = match inner.stats.opened_at {
                Some(opened_at) => self
                    .config
                    .recovery_timeout
                    .saturating_sub(now.duration_since(opened_at)),
                None => self.config.recovery_timeout,
            };
            Err(CircuitBreakerError {
                name: self.name.clone(),
                state: inner.state,
                recovery_time,
            })
        }
    }

    async fn record_timeout(&self) {
        let mut inner = self.inner.lock().await;
        inner.stats.timeout_calls += 1;
        drop(inner);
        self.record_failure().await;
    }

    async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        inner.stats.successful_calls += 1;
        inner.stats.last_success_time = Some(Utc::now());

        match inner.state {
            CircuitState::Closed => {
                inner.stats.recent_successes.push(now);
                let window_size = self.config.window_size;
                inner.stats.trim_window(window_size);
            }
            CircuitState::HalfOpen => {
                inner.stats.half_open_successes += 1;
                if inner.stats.half_open_successes >= self.config.success_threshold {
                    inner.stats.reset_window();
                    inner.stats.opened_at = None;
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            CircuitState::Open => {}
        }
    }

    async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        inner.stats.failed_calls += 1;
        inner.stats.last_failure_time = Some(Utc::now());

        match inner.state {
            CircuitState::Closed => {
                inner.stats.recent_failures.push(now);
                let window_size = self.config.window_size;
                inner.stats.trim_window(window_size);
                if self.should_open(&inner.stats) {
                    inner.stats.opened_at = Some(now);
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                inner.stats.half_open_failures += 1;
                inner.stats.opened_at = Some(now);
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    fn should_open(&self, stats: &Stats) -> bool {
        let total = stats.recent_successes.len() + stats.recent_failures.len();
        stats.recent_failures.len() as u32 >= self.config.failure_threshold
            || (total >= self.config.min_calls_for_rate
                && stats.failure_rate() >= self.config.failure_rate_threshold)
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        inner.stats.state_changes.push(StateChange {
            from,
            to,
            at: Utc::now(),
        });
        match to {
            CircuitState::Open => warn!(breaker = %self.name, "circuit opened"),
            CircuitState::HalfOpen => debug!(breaker = %self.name, "circuit half-open, admitting trial calls"),
            CircuitState::Closed => debug!(breaker = %self.name, "circuit closed"),
        }
        self.notify_listeners(from, to);
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    pub async fn status(&self) -> CircuitStatus {
        let inner = self.inner.lock().await;
        CircuitStatus {
            name: self.name.clone(),
            state: inner.state,
            total_calls: inner.stats.total_calls,
            successful_calls: inner.stats.successful_calls,
            failed_calls: inner.stats.failed_calls,
            rejected_calls: inner.stats.rejected_calls,
            timeout_calls: inner.stats.timeout_calls,
            failure_rate: inner.stats.failure_rate(),
            last_failure_time: inner.stats.last_failure_time,
            last_success_time: inner.stats.last_success_time,
            half_open_successes: inner.stats.half_open_successes,
            half_open_failures: inner.stats.half_open_failures,
        }
    }

    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        let from = inner.state;
        inner.stats = Stats::default();
        inner.state = CircuitState::Closed;
        if from != CircuitState::Closed {
            self.notify_listeners(from, CircuitState::Closed);
        }
    }

    pub async fn force_open(&self, recovery_timeout_override: Option<Duration>) {
        let mut inner = self.inner.lock().await;
        if let Some(duration) = recovery_timeout_override {
            inner.stats.opened_at = Some(Instant::now() - self.config.recovery_timeout + duration);
        } else {
            inner.stats.opened_at = Some(Instant::now());
        }
        self.transition(&mut inner, CircuitState::Open);
    }
}
