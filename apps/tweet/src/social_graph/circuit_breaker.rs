//! Circuit breaker guarding calls to a remote dependency.
//!
//! Closed: calls pass through and consecutive failures are counted. Reaching the failure
//! threshold trips the breaker to Open, where calls are rejected without touching the
//! dependency. Once `open_for` has elapsed the breaker moves to HalfOpen and admits a limited
//! number of probe calls; a successful probe closes it again, a failed one reopens it with a
//! fresh timeout.
//!
//! Every state change bumps a generation counter. Outcomes reported by calls admitted under an
//! older generation are ignored.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub name: String,
    /// Consecutive failures while Closed that trip the breaker.
    pub failure_threshold: u32,
    /// Time spent Open before a probe is allowed.
    pub open_for: Duration,
    /// Concurrent probes admitted while HalfOpen; also the successes needed to close.
    pub half_open_max_calls: u32,
}

impl CircuitBreakerConfig {
    /// Fail-fast policy: a single failure opens the breaker for `open_for`, one probe at a time.
    pub fn fail_fast(name: impl Into<String>, open_for: Duration) -> Self {
        CircuitBreakerConfig {
            name: name.into(),
            failure_threshold: 1,
            open_for,
            half_open_max_calls: 1,
        }
    }
}

/// Receives every state transition of a breaker.
pub trait StateChangeSink: Send + Sync {
    fn state_changed(&self, breaker: &str, from: CircuitState, to: CircuitState);
}

/// Reports transitions as structured log events.
pub struct TracingSink;

impl StateChangeSink for TracingSink {
    fn state_changed(&self, breaker: &str, from: CircuitState, to: CircuitState) {
        info!(breaker, %from, %to, "Circuit breaker state changed");
    }
}

/// Classifies an error as a failure of the dependency itself.
///
/// Errors that return `false` (e.g. the dependency rejected a malformed request) prove the
/// dependency is up and count as successes.
pub trait TripsBreaker {
    fn trips_breaker(&self) -> bool {
        true
    }
}

#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error("circuit breaker '{0}' is open")]
    Open(String),

    #[error(transparent)]
    Inner(E),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    Abandoned,
}

#[derive(Debug, Clone, Copy)]
struct Ticket {
    generation: u64,
    probe: bool,
}

type Transition = (CircuitState, CircuitState);

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    generation: u64,
    consecutive_failures: u32,
    consecutive_successes: u32,
    probes_in_flight: u32,
    open_until: Option<Instant>,
}

impl Inner {
    fn set_state(&mut self, to: CircuitState, now: Instant, open_for: Duration) -> Transition {
        let from = self.state;
        self.state = to;
        self.generation += 1;
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        self.probes_in_flight = 0;
        self.open_until = match to {
            CircuitState::Open => Some(now + open_for),
            _ => None,
        };
        (from, to)
    }

    /// Moves Open to HalfOpen once the open deadline has passed.
    fn refresh(&mut self, now: Instant, open_for: Duration) -> Option<Transition> {
        match (self.state, self.open_until) {
            (CircuitState::Open, Some(until)) if now >= until => {
                Some(self.set_state(CircuitState::HalfOpen, now, open_for))
            }
            _ => None,
        }
    }
}

/// An internally synchronized breaker, shared by every request hitting one dependency.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    sink: Arc<dyn StateChangeSink>,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_sink(config, Arc::new(TracingSink))
    }

    pub fn with_sink(config: CircuitBreakerConfig, sink: Arc<dyn StateChangeSink>) -> Self {
        CircuitBreaker {
            config,
            sink,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                generation: 0,
                consecutive_failures: 0,
                consecutive_successes: 0,
                probes_in_flight: 0,
                open_until: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn state(&self) -> CircuitState {
        let (state, transition) = {
            let mut inner = self.lock();
            let transition = inner.refresh(Instant::now(), self.config.open_for);
            (inner.state, transition)
        };
        self.report(transition);
        state
    }

    /// Runs `operation` unless the breaker rejects it, and records the outcome.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: TripsBreaker,
    {
        let ticket = self.admit()?;
        let mut call = CallGuard {
            breaker: self,
            ticket,
            settled: false,
        };

        let result = operation().await;
        let outcome = match &result {
            Ok(_) => Outcome::Success,
            Err(e) if e.trips_breaker() => Outcome::Failure,
            Err(_) => Outcome::Success,
        };
        call.settle(outcome);

        result.map_err(BreakerError::Inner)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn report(&self, transition: Option<Transition>) {
        if let Some((from, to)) = transition {
            self.sink.state_changed(&self.config.name, from, to);
        }
    }

    fn admit<E>(&self) -> Result<Ticket, BreakerError<E>> {
        let (admitted, transition) = {
            let mut inner = self.lock();
            let transition = inner.refresh(Instant::now(), self.config.open_for);
            let admitted = match inner.state {
                CircuitState::Closed => Some(Ticket {
                    generation: inner.generation,
                    probe: false,
                }),
                CircuitState::HalfOpen
                    if inner.probes_in_flight < self.config.half_open_max_calls =>
                {
                    inner.probes_in_flight += 1;
                    Some(Ticket {
                        generation: inner.generation,
                        probe: true,
                    })
                }
                CircuitState::HalfOpen | CircuitState::Open => None,
            };
            (admitted, transition)
        };
        self.report(transition);
        admitted.ok_or_else(|| BreakerError::Open(self.config.name.clone()))
    }

    fn settle(&self, ticket: Ticket, outcome: Outcome) {
        let transitions = {
            let mut inner = self.lock();
            let now = Instant::now();
            let open_for = self.config.open_for;
            let mut transitions = Vec::with_capacity(2);
            transitions.extend(inner.refresh(now, open_for));

            if ticket.generation == inner.generation {
                let outcome = match outcome {
                    // A dropped probe must not leave the breaker stuck in HalfOpen.
                    Outcome::Abandoned if ticket.probe => Outcome::Failure,
                    other => other,
                };
                match (inner.state, outcome) {
                    (_, Outcome::Abandoned) => {}
                    (CircuitState::Closed, Outcome::Success) => inner.consecutive_failures = 0,
                    (CircuitState::Closed, Outcome::Failure) => {
                        inner.consecutive_failures += 1;
                        if inner.consecutive_failures >= self.config.failure_threshold {
                            transitions.push(inner.set_state(CircuitState::Open, now, open_for));
                        }
                    }
                    (CircuitState::HalfOpen, Outcome::Success) => {
                        inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
                        inner.consecutive_successes += 1;
                        if inner.consecutive_successes >= self.config.half_open_max_calls {
                            transitions.push(inner.set_state(CircuitState::Closed, now, open_for));
                        }
                    }
                    (CircuitState::HalfOpen, Outcome::Failure) => {
                        transitions.push(inner.set_state(CircuitState::Open, now, open_for));
                    }
                    (CircuitState::Open, _) => {}
                }
            }
            transitions
        };
        for transition in transitions {
            self.report(Some(transition));
        }
    }
}

/// Settles an admitted call exactly once, even when the call future is dropped mid-flight.
struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    ticket: Ticket,
    settled: bool,
}

impl CallGuard<'_> {
    fn settle(&mut self, outcome: Outcome) {
        if !self.settled {
            self.settled = true;
            self.breaker.settle(self.ticket, outcome);
        }
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.settle(Outcome::Abandoned);
    }
}
