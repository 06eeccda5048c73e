use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/* ============================= STATES ============================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/* ============================= BREAKER ============================= */

/// Sliding-window circuit breaker for the cloud API.
///
/// Trips to Open once the failure ratio over the recent-outcome window is
/// exceeded; stays Open for `open_timeout`, then HalfOpen admits exactly one
/// probe call. The probe's outcome decides between Closed and Open.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    window: usize,
    min_calls: usize,
    failure_ratio: f64,
    open_timeout: Duration,
}

struct Inner {
    state: CircuitState,
    outcomes: VecDeque<bool>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(20, 5, 0.5, Duration::from_secs(30))
    }
}

impl CircuitBreaker {
    pub fn new(window: usize, min_calls: usize, failure_ratio: f64, open_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                outcomes: VecDeque::with_capacity(window),
                opened_at: None,
                probe_in_flight: false,
            }),
            window,
            min_calls,
            failure_ratio,
            open_timeout,
        }
    }

    /// Whether a call may proceed right now.
    ///
    /// In Open, an elapsed timeout moves to HalfOpen and grants the caller
    /// the single probe slot.
    pub fn check(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker lock not poisoned");
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let expired = inner
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.open_timeout);
                if expired {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock not poisoned");
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.outcomes.clear();
                inner.opened_at = None;
                inner.probe_in_flight = false;
            }
            _ => self.push_outcome(&mut inner, true),
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock not poisoned");
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_in_flight = false;
            }
            _ => {
                self.push_outcome(&mut inner, false);
                self.maybe_trip(&mut inner);
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("breaker lock not poisoned").state
    }

    fn push_outcome(&self, inner: &mut Inner, success: bool) {
        if inner.outcomes.len() == self.window {
            inner.outcomes.pop_front();
        }
        inner.outcomes.push_back(success);
    }

    fn maybe_trip(&self, inner: &mut Inner) {
        if inner.outcomes.len() < self.min_calls {
            return;
        }
        let failures = inner.outcomes.iter().filter(|ok| !**ok).count();
        let ratio = failures as f64 / inner.outcomes.len() as f64;
        if ratio >= self.failure_ratio {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.outcomes.clear();
        }
    }
}

/* ============================= TESTS ============================= */
