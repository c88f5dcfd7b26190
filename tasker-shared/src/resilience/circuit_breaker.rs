//! # Circuit Breaker
//!
//! A classic three-state (Closed / Open / HalfOpen) circuit breaker
//! used to shield callers from a degraded [`StateBackend`] or
//! downstream dependency. Ambient fault isolation rather than a
//! domain concept — every backend-facing component wraps its calls
//! in one.
//!
//! [`StateBackend`]: crate::backend::StateBackend

use crate::resilience::{CircuitBreakerBehavior, CircuitBreakerMetrics};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Current position in the Closed -> Open -> HalfOpen -> Closed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Calls pass through normally.
    Closed,
    /// Calls are rejected until `timeout` has elapsed since opening.
    Open,
    /// A limited number of trial calls are allowed through to probe recovery.
    HalfOpen,
}

/// Tuning knobs for a [`CircuitBreaker`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in `Closed` state before tripping to `Open`.
    pub failure_threshold: u32,
    /// How long the circuit stays `Open` before allowing a trial call.
    pub timeout: Duration,
    /// Consecutive successes in `HalfOpen` state before closing again.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    total_calls: u64,
    success_count: u64,
    failure_count: u64,
    half_open_calls: u64,
    total_duration: Duration,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            total_calls: 0,
            success_count: 0,
            failure_count: 0,
            half_open_calls: 0,
            total_duration: Duration::ZERO,
        }
    }

    fn metrics(&self) -> CircuitBreakerMetrics {
        let failure_rate = if self.total_calls == 0 {
            0.0
        } else {
            self.failure_count as f64 / self.total_calls as f64
        };
        let success_rate = if self.total_calls == 0 {
            0.0
        } else {
            self.success_count as f64 / self.total_calls as f64
        };
        let average_duration = if self.total_calls == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.total_calls as u32
        };

        CircuitBreakerMetrics {
            total_calls: self.total_calls,
            success_count: self.success_count,
            failure_count: self.failure_count,
            consecutive_failures: self.consecutive_failures as u64,
            half_open_calls: self.half_open_calls,
            total_duration: self.total_duration,
            current_state: self.state,
            failure_rate,
            success_rate,
            average_duration,
        }
    }
}

/// A named circuit breaker protecting one component.
///
/// Cloning is cheap-by-reference: wrap in `Arc` to share across tasks,
/// the way [`CircuitBreakerBehavior`] consumers are expected to.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner::new()),
        }
    }

    /// Record a success measured by the caller rather than by
    /// `CircuitBreakerBehavior::record_success`; identical bookkeeping,
    /// named separately so call sites that time their own work read
    /// clearly at the point of use.
    pub fn record_success_manual(&self, duration: Duration) {
        self.record_success(duration);
    }

    /// See [`Self::record_success_manual`].
    pub fn record_failure_manual(&self, duration: Duration) {
        self.record_failure(duration);
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}

impl CircuitBreakerBehavior for CircuitBreaker {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> CircuitState {
        self.inner.lock().expect("circuit breaker mutex poisoned").state
    }

    fn should_allow(&self) -> bool {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|opened_at| opened_at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.consecutive_successes = 0;
                    inner.half_open_calls = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self, duration: Duration) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        inner.total_calls += 1;
        inner.success_count += 1;
        inner.total_duration += duration;

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.half_open_calls += 1;
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    inner.opened_at = None;
                }
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self, duration: Duration) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        inner.total_calls += 1;
        inner.failure_count += 1;
        inner.total_duration += duration;

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.consecutive_successes = 0;
                inner.consecutive_failures = self.config.failure_threshold;
            }
            CircuitState::Open => {
                inner.opened_at = Some(Instant::now());
            }
        }
    }

    fn is_healthy(&self) -> bool {
        self.metrics().is_healthy()
    }

    fn force_open(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
    }

    fn force_closed(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.opened_at = None;
    }

    fn metrics(&self) -> CircuitBreakerMetrics {
        self.inner.lock().expect("circuit breaker mutex poisoned").metrics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32, success_threshold: u32, timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test-component",
            CircuitBreakerConfig {
                failure_threshold,
                timeout,
                success_threshold,
            },
        )
    }

    #[test]
    fn starts_closed_and_allows_calls() {
        let cb = breaker(3, 1, Duration::from_secs(30));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.should_allow());
    }

    #[test]
    fn trips_open_after_consecutive_failures() {
        let cb = breaker(3, 1, Duration::from_secs(30));
        cb.record_failure(Duration::from_millis(1));
        cb.record_failure(Duration::from_millis(1));
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure(Duration::from_millis(1));
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.should_allow());
    }

    #[test]
    fn success_resets_consecutive_failure_count() {
        let cb = breaker(3, 1, Duration::from_secs(30));
        cb.record_failure(Duration::from_millis(1));
        cb.record_failure(Duration::from_millis(1));
        cb.record_success(Duration::from_millis(1));
        cb.record_failure(Duration::from_millis(1));
        cb.record_failure(Duration::from_millis(1));
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_opens_after_timeout_and_closes_on_success_threshold() {
        let cb = breaker(1, 2, Duration::from_millis(10));
        cb.record_failure(Duration::from_millis(1));
        assert_eq!(cb.state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(20));

        assert!(cb.should_allow());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success(Duration::from_millis(1));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success(Duration::from_millis(1));
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens_circuit() {
        let cb = breaker(1, 2, Duration::from_millis(10));
        cb.record_failure(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(20));
        assert!(cb.should_allow());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_failure(Duration::from_millis(1));
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn force_open_and_force_closed_override_state() {
        let cb = breaker(3, 1, Duration::from_secs(30));
        cb.force_open();
        assert_eq!(cb.state(), CircuitState::Open);
        cb.force_closed();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn metrics_track_rates() {
        let cb = breaker(5, 1, Duration::from_secs(30));
        cb.record_success(Duration::from_millis(10));
        cb.record_success(Duration::from_millis(10));
        cb.record_failure(Duration::from_millis(10));
        let metrics = cb.metrics();
        assert_eq!(metrics.total_calls, 3);
        assert!((metrics.success_rate - (2.0 / 3.0)).abs() < f64::EPSILON);
    }
}
