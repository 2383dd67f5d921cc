//! Error types for forge-resilience.

use std::time::Duration;

use thiserror::Error;

use crate::circuit_breaker::CircuitState;

/// Raised when a call is rejected because its breaker is not admitting
/// traffic. Scheduler task loops pattern-match on this specifically (§4.6
/// step 4): it counts as a non-failure, because the downstream breaker is
/// already protecting the dependency.
#[derive(Debug, Error, Clone)]
#[error("circuit '{name}' is {state:?}; retry after {recovery_time:?}")]
pub struct CircuitBreakerError {
    pub name: String,
    pub state: CircuitState,
    pub recovery_time: Duration,
}

/// Outcome of a guarded call: either the inner future completed (carrying
/// its own `Result`), or the breaker intervened before it ran, or the call
/// exceeded its timeout.
#[derive(Debug, Error)]
pub enum CallError<E> {
    #[error(transparent)]
    Rejected(#[from] CircuitBreakerError),

    #[error("call exceeded its configured timeout")]
    Timeout,

    #[error(transparent)]
    Inner(E),
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task '{0}' is not registered")]
    UnknownTask(String),

    #[error("task '{0}' is already registered")]
    AlreadyRegistered(String),
}
