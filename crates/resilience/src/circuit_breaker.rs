//! Circuit breaker (`spec.md` §4.9): closed/open/half-open state machine
//! guarding calls to an unhealthy dependency. The open→half-open
//! transition is lazy — it only becomes observable the next time the
//! state is queried or an attempt is made, never on a timer of its own.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use warden_core::{Clock, SystemClock};
use warden_error::WardenError;

/// Observable state of a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum State {
    /// Calls pass through; failures accumulate toward the trip threshold.
    Closed,
    /// Every call is rejected with [`WardenError::CircuitOpen`].
    Open,
    /// A bounded number of probe calls are permitted.
    HalfOpen,
}

/// Tunables for a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Failures within the monitor window needed to trip from closed to
    /// open.
    pub failure_threshold: usize,
    /// Width of the rolling window failures are counted within.
    pub monitor_window_millis: i64,
    /// How long to stay open before allowing a half-open probe.
    pub reset_timeout_millis: i64,
    /// Concurrent probe attempts permitted while half-open.
    pub half_open_max_attempts: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            monitor_window_millis: 60_000,
            reset_timeout_millis: 30_000,
            half_open_max_attempts: 1,
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: State,
    failure_timestamps: VecDeque<i64>,
    success_count: usize,
    half_open_in_flight: usize,
    total_trips: u64,
    tripped_at_millis: Option<i64>,
}

/// A named circuit breaker. Cheap to clone (shares state via `Arc`).
#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Arc<Mutex<Inner>>,
}

/// A snapshot of a breaker's counters, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Current state, after any lazy open→half-open transition.
    pub state: State,
    /// Failures currently counted within the monitor window.
    pub failure_count: usize,
    /// Consecutive successes recorded since the last open→half-open.
    pub success_count: usize,
    /// Total number of times this breaker has tripped to open.
    pub total_trips: u64,
}

impl CircuitBreaker {
    /// Creates a breaker using the system clock.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    /// Creates a breaker using an explicit clock (for deterministic
    /// tests).
    #[must_use]
    pub fn with_clock(name: impl Into<Arc<str>>, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            inner: Arc::new(Mutex::new(Inner {
                state: State::Closed,
                failure_timestamps: VecDeque::new(),
                success_count: 0,
                half_open_in_flight: 0,
                total_trips: 0,
                tripped_at_millis: None,
            })),
        }
    }

    /// This breaker's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Applies the lazy open→half-open transition if `reset_timeout_millis`
    /// has elapsed, then returns the resulting state.
    #[must_use]
    pub fn state(&self) -> State {
        let mut inner = self.inner.lock();
        self.apply_lazy_transition(&mut inner);
        inner.state
    }

    /// A snapshot of the breaker's counters.
    #[must_use]
    pub fn stats(&self) -> Stats {
        let mut inner = self.inner.lock();
        self.apply_lazy_transition(&mut inner);
        self.prune_failures(&mut inner);
        Stats {
            state: inner.state,
            failure_count: inner.failure_timestamps.len(),
            success_count: inner.success_count,
            total_trips: inner.total_trips,
        }
    }

    fn apply_lazy_transition(&self, inner: &mut Inner) {
        if inner.state == State::Open
            && let Some(tripped_at) = inner.tripped_at_millis
            && self.clock.now_millis() - tripped_at >= self.config.reset_timeout_millis
        {
            inner.state = State::HalfOpen;
            inner.half_open_in_flight = 0;
            inner.success_count = 0;
        }
    }

    fn prune_failures(&self, inner: &mut Inner) {
        let now = self.clock.now_millis();
        while inner
            .failure_timestamps
            .front()
            .is_some_and(|t| now - *t > self.config.monitor_window_millis)
        {
            inner.failure_timestamps.pop_front();
        }
    }

    /// Whether a call may proceed right now. Reserves a half-open slot as
    /// a side effect when the breaker is half-open and a slot is free.
    fn should_attempt(&self, inner: &mut Inner) -> bool {
        self.apply_lazy_transition(inner);
        match inner.state {
            State::Closed => true,
            State::Open => false,
            State::HalfOpen => {
                if inner.half_open_in_flight < self.config.half_open_max_attempts {
                    inner.half_open_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            State::Closed => {
                inner.failure_timestamps.clear();
            }
            State::HalfOpen => {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                inner.success_count += 1;
                if inner.success_count >= self.config.half_open_max_attempts {
                    inner.state = State::Closed;
                    inner.failure_timestamps.clear();
                    inner.success_count = 0;
                    inner.half_open_in_flight = 0;
                }
            }
            State::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let now = self.clock.now_millis();
        match inner.state {
            State::Closed => {
                inner.failure_timestamps.push_back(now);
                self.prune_failures(&mut inner);
                if inner.failure_timestamps.len() >= self.config.failure_threshold {
                    self.trip(&mut inner, now);
                }
            }
            State::HalfOpen => {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                self.trip(&mut inner, now);
            }
            State::Open => {}
        }
    }

    fn trip(&self, inner: &mut Inner, now: i64) {
        inner.state = State::Open;
        inner.tripped_at_millis = Some(now);
        inner.success_count = 0;
        inner.half_open_in_flight = 0;
        inner.total_trips += 1;
        tracing::warn!(breaker = %self.name, total_trips = inner.total_trips, "circuit breaker tripped open");
    }

    /// Forces the breaker closed and clears all counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = State::Closed;
        inner.failure_timestamps.clear();
        inner.success_count = 0;
        inner.half_open_in_flight = 0;
        inner.tripped_at_millis = None;
    }

    /// Runs `f` if the breaker allows it, recording success/failure and
    /// driving state transitions. Rejects with [`WardenError::CircuitOpen`]
    /// without invoking `f` when the breaker denies the attempt.
    pub async fn execute<F, Fut, T, E>(&self, f: F) -> Result<T, WardenError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let allowed = {
            let mut inner = self.inner.lock();
            self.should_attempt(&mut inner)
        };
        if !allowed {
            return Err(WardenError::CircuitOpen { name: self.name.to_string() });
        }

        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(_error) => {
                self.record_failure();
                Err(WardenError::CircuitOpen { name: self.name.to_string() })
            }
        }
    }
}
