//! Cooperative periodic task runner (§4.6).
//!
//! Each registered task gets its own async loop. A task that fails
//! `MAX_CONSECUTIVE_FAILURES` times in a row auto-disables itself rather than
//! spinning forever against a dependency that isn't coming back soon; a
//! [`CircuitBreakerError`] from a task is treated as a non-failure, since the
//! breaker it went through is already doing the protecting.

use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::error::CircuitBreakerError;

pub const MAX_CONSECUTIVE_FAILURES: u32 = 10;

/// Why a task iteration failed. [`TaskFailure::CircuitOpen`] is accounted as
/// a non-failure per §4.6 step 4; everything else increments the failure
/// counters.
#[derive(Debug)]
pub enum TaskFailure {
    CircuitOpen(CircuitBreakerError),
    Other(String),
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskFailure::CircuitOpen(e) => write!(f, "{e}"),
            TaskFailure::Other(msg) => write!(f, "{msg}"),
        }
    }
}

pub type BoxFuture = Pin<Box<dyn Future<Output = Result<(), TaskFailure>> + Send>>;
pub type TaskFn = Arc<dyn Fn() -> BoxFuture + Send + Sync>;

#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskStats {
    pub name: String,
    pub enabled: bool,
    pub auto_disabled: bool,
    pub run_count: u64,
    pub error_count: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_run: Option<DateTime<Utc>>,
}

struct TaskState {
    enabled: bool,
    auto_disabled: bool,
    run_count: u64,
    error_count: u64,
    consecutive_failures: u32,
    last_error: Option<String>,
    last_run: Option<DateTime<Utc>>,
}

struct TaskEntry {
    name: String,
    interval: Duration,
    func: TaskFn,
    state: Mutex<TaskState>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

fn jitter_seconds(name: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish() % 10
}

/// Runs a single task iteration and applies the success/failure accounting
/// shared by the loop, `run_task_now`, and `reset_task`'s restart.
async fn execute_and_record(entry: &TaskEntry) {
    let outcome = (entry.func)().await;
    let mut state = entry.state.lock().await;
    state.last_run = Some(Utc::now());
    match outcome {
        Ok(()) => {
            state.consecutive_failures = 0;
            state.run_count += 1;
        }
        Err(TaskFailure::CircuitOpen(e)) => {
            info!(task = %entry.name, error = %e, "task skipped: breaker open");
        }
        Err(TaskFailure::Other(message)) => {
            state.error_count += 1;
            state.consecutive_failures += 1;
            state.last_error = Some(message.clone());
            warn!(task = %entry.name, error = %message, consecutive_failures = state.consecutive_failures, "task failed");
            if state.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                state.auto_disabled = true;
                state.enabled = false;
                error!(task = %entry.name, "task auto-disabled after repeated failures; call reset_task to resume");
            }
        }
    }
}

pub struct BackgroundScheduler {
    tasks: DashMap<String, Arc<TaskEntry>>,
    running: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Default for BackgroundScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundScheduler {
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            tasks: DashMap::new(),
            running: AtomicBool::new(false),
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn register(&self, name: &str, interval: Duration, enabled: bool, func: TaskFn) {
        if self.tasks.contains_key(name) {
            warn!(task = name, "task already registered, ignoring re-registration");
            return;
        }
        let entry = Arc::new(TaskEntry {
            name: name.to_string(),
            interval,
            func,
            state: Mutex::new(TaskState {
                enabled,
                auto_disabled: false,
                run_count: 0,
                error_count: 0,
                consecutive_failures: 0,
                last_error: None,
                last_run: None,
            }),
            handle: Mutex::new(None),
        });
        self.tasks.insert(name.to_string(), entry);
    }

    #[instrument(skip(self))]
    pub async fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        for entry in self.tasks.iter() {
            let entry = entry.value().clone();
            let enabled = {
                let state = entry.state.lock().await;
                state.enabled && !state.auto_disabled
            };
            if enabled {
                self.spawn_loop(entry).await;
            }
        }
    }

    async fn spawn_loop(&self, entry: Arc<TaskEntry>) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        let handle = tokio::spawn(async move {
            let jitter = Duration::from_secs(jitter_seconds(&entry.name));
            tokio::select! {
                _ = tokio::time::sleep(jitter) => {}
                _ = shutdown_rx.changed() => return,
            }

            loop {
                {
                    let state = entry.state.lock().await;
                    if state.auto_disabled {
                        break;
                    }
                }

                execute_and_record(&entry).await;

                tokio::select! {
                    _ = tokio::time::sleep(entry.interval) => {}
                    _ = shutdown_rx.changed() => break,
                }
            }
        });
        *entry.handle.lock().await = Some(handle);
    }

    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);
        for entry in self.tasks.iter() {
            let handle = entry.value().handle.lock().await.take();
            if let Some(handle) = handle {
                let _ = handle.await;
            }
        }
        let _ = self.shutdown_tx.send(false);
    }

    pub fn enable_task(&self, name: &str) {
        if let Some(entry) = self.tasks.get(name) {
            let entry = entry.value().clone();
            tokio::spawn(async move {
                entry.state.lock().await.enabled = true;
            });
        }
    }

    pub fn disable_task(&self, name: &str) {
        if let Some(entry) = self.tasks.get(name) {
            let entry = entry.value().clone();
            tokio::spawn(async move {
                entry.state.lock().await.enabled = false;
            });
        }
    }

    /// Spawns the loop for a task registered after [`start`](Self::start)
    /// already ran (§5 Concurrency: "registrations after are allowed but
    /// only `start_now` triggers a loop for new tasks in a running
    /// scheduler"). A no-op if the scheduler isn't running, the task is
    /// unknown, already has a loop, or is disabled/auto-disabled.
    pub async fn start_now(&self, name: &str) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        let Some(entry) = self.tasks.get(name).map(|e| e.value().clone()) else {
            return false;
        };
        if entry.handle.lock().await.is_some() {
            return false;
        }
        let enabled = {
            let state = entry.state.lock().await;
            state.enabled && !state.auto_disabled
        };
        if !enabled {
            return false;
        }
        self.spawn_loop(entry).await;
        true
    }

    pub async fn run_task_now(&self, name: &str) -> bool {
        let Some(entry) = self.tasks.get(name).map(|e| e.value().clone()) else {
            return false;
        };
        execute_and_record(&entry).await;
        true
    }

    pub async fn reset_task(&self, name: &str) {
        let Some(entry) = self.tasks.get(name).map(|e| e.value().clone()) else {
            return;
        };
        {
            let mut state = entry.state.lock().await;
            state.consecutive_failures = 0;
            state.error_count = 0;
            state.auto_disabled = false;
            state.enabled = true;
            state.last_error = None;
        }
        if self.running.load(Ordering::SeqCst) {
            self.spawn_loop(entry).await;
        }
    }

    pub async fn get_stats(&self) -> Vec<TaskStats> {
        let mut stats = Vec::with_capacity(self.tasks.len());
        for entry in self.tasks.iter() {
            let state = entry.value().state.lock().await;
            stats.push(TaskStats {
                name: entry.value().name.clone(),
                enabled: state.enabled,
                auto_disabled: state.auto_disabled,
                run_count: state.run_count,
                error_count: state.error_count,
                consecutive_failures: state.consecutive_failures,
                last_error: state.last_error.clone(),
                last_run: state.last_run,
            });
        }
        stats
    }

    pub async fn get_auto_disabled_tasks(&self) -> Vec<String> {
        self.get_stats()
            .await
            .into_iter()
            .filter(|s| s.auto_disabled)
            .map(|s| s.name)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn failing_task(counter: Arc<AtomicU32>) -> TaskFn {
        Arc::new(move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(TaskFailure::Other("boom".to_string()))
            })
        })
    }

    fn counting_task(counter: Arc<AtomicU32>) -> TaskFn {
        Arc::new(move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn run_task_now_runs_outside_the_loop() {
        let scheduler = BackgroundScheduler::new();
        let counter = Arc::new(AtomicU32::new(0));
        scheduler.register("once", Duration::from_secs(3600), false, counting_task(counter.clone()));
        assert!(scheduler.run_task_now("once").await);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        let stats = scheduler.get_stats().await;
        assert_eq!(stats[0].run_count, 1);
    }

    #[tokio::test]
    async fn auto_disables_after_max_consecutive_failures() {
        let scheduler = BackgroundScheduler::new();
        let counter = Arc::new(AtomicU32::new(0));
        scheduler.register("flaky", Duration::from_secs(3600), false, failing_task(counter));

        for _ in 0..MAX_CONSECUTIVE_FAILURES {
            scheduler.run_task_now("flaky").await;
        }

        let stats = scheduler.get_stats().await;
        assert!(stats[0].auto_disabled);
        assert_eq!(scheduler.get_auto_disabled_tasks().await, vec!["flaky".to_string()]);
    }

    #[tokio::test]
    async fn reset_task_clears_auto_disabled() {
        let scheduler = BackgroundScheduler::new();
        let counter = Arc::new(AtomicU32::new(0));
        scheduler.register("flaky", Duration::from_secs(3600), false, failing_task(counter));
        for _ in 0..MAX_CONSECUTIVE_FAILURES {
            scheduler.run_task_now("flaky").await;
        }
        assert!(scheduler.get_stats().await[0].auto_disabled);

        scheduler.reset_task("flaky").await;
        let stats = scheduler.get_stats().await;
        assert!(!stats[0].auto_disabled);
        assert_eq!(stats[0].consecutive_failures, 0);
    }

    #[tokio::test]
    async fn circuit_open_does_not_count_as_failure() {
        let scheduler = BackgroundScheduler::new();
        let task: TaskFn = Arc::new(|| {
            Box::pin(async {
                Err(TaskFailure::CircuitOpen(CircuitBreakerError {
                    name: "neo4j".to_string(),
                    state: crate::circuit_breaker::CircuitState::Open,
                    recovery_time: Duration::from_secs(5),
                }))
            })
        });
        scheduler.register("snapshot", Duration::from_secs(3600), false, task);
        scheduler.run_task_now("snapshot").await;
        let stats = scheduler.get_stats().await;
        assert_eq!(stats[0].consecutive_failures, 0);
        assert_eq!(stats[0].error_count, 0);
    }

    #[tokio::test]
    async fn re_registering_a_name_is_a_noop() {
        let scheduler = BackgroundScheduler::new();
        let counter_a = Arc::new(AtomicU32::new(0));
        let counter_b = Arc::new(AtomicU32::new(0));
        scheduler.register("task", Duration::from_secs(3600), false, counting_task(counter_a.clone()));
        scheduler.register("task", Duration::from_secs(3600), false, counting_task(counter_b.clone()));
        scheduler.run_task_now("task").await;
        assert_eq!(counter_a.load(Ordering::SeqCst), 1);
        assert_eq!(counter_b.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn start_and_stop_shuts_down_cleanly() {
        // The startup jitter (hash(name) % 10 seconds) means a short sleep
        // can't reliably observe a run before shutdown; this test only
        // asserts that start()/stop() themselves complete without hanging.
        let scheduler = BackgroundScheduler::new();
        let counter = Arc::new(AtomicU32::new(0));
        scheduler.register("fast", Duration::from_millis(20), true, counting_task(counter));
        scheduler.start().await;
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn start_now_spawns_a_loop_for_a_task_registered_after_start() {
        let scheduler = BackgroundScheduler::new();
        scheduler.start().await;

        assert!(!scheduler.start_now("unknown").await);

        let counter = Arc::new(AtomicU32::new(0));
        scheduler.register("late", Duration::from_secs(3600), true, counting_task(counter));
        assert!(scheduler.start_now("late").await);
        // Already has a loop running; a second call is a no-op.
        assert!(!scheduler.start_now("late").await);

        scheduler.stop().await;
    }
}
