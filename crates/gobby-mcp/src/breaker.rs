//! Per-server circuit breaker.
//!
//! Trips open after `failure_threshold` consecutive failures; refuses
//! attempts until `cooldown` has elapsed since the last failure, then
//! lets one probe through (half-open). A success closes it.

use std::time::{Duration, Instant};

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Attempts flow normally.
    Closed,
    /// Attempts are refused until the cooldown elapses.
    Open,
    /// One probe attempt is allowed.
    HalfOpen,
}

/// What a pre-attempt check decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerDecision {
    /// Proceed with the attempt.
    Proceed,
    /// Refuse; retry after the given duration when known.
    Refuse {
        /// Remaining cooldown, when a last-failure time exists.
        retry_after: Option<Duration>,
    },
}

/// The breaker itself.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    failure_threshold: u32,
    cooldown: Duration,
    last_failure_time: Option<Instant>,
}

impl CircuitBreaker {
    /// Breaker with the given trip threshold and cooldown.
    #[must_use]
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            failure_threshold: failure_threshold.max(1),
            cooldown,
            last_failure_time: None,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Consecutive failures recorded.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Decide whether an attempt may proceed. Transitions Open →
    /// HalfOpen once the cooldown has elapsed.
    pub fn check(&mut self) -> BreakerDecision {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => BreakerDecision::Proceed,
            CircuitState::Open => match self.last_failure_time {
                Some(last) => {
                    let elapsed = last.elapsed();
                    if elapsed >= self.cooldown {
                        self.state = CircuitState::HalfOpen;
                        BreakerDecision::Proceed
                    } else {
                        BreakerDecision::Refuse {
                            retry_after: Some(self.cooldown - elapsed),
                        }
                    }
                }
                None => BreakerDecision::Refuse { retry_after: None },
            },
        }
    }

    /// Record a successful attempt: the breaker closes.
    pub fn record_success(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.last_failure_time = None;
    }

    /// Record a failed attempt. Trips open at the threshold, and a
    /// half-open probe failure re-opens immediately.
    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure_time = Some(Instant::now());
        if self.state == CircuitState::HalfOpen
            || self.consecutive_failures >= self.failure_threshold
        {
            self.state = CircuitState::Open;
        }
    }
}
