//! Per-target circuit breaker: opens after 5 consecutive failures, resets after 60s.
//!
//! Connection-state/backoff tracking generalized from a single channel's reconnect state into
//! an explicit open/closed breaker per outbound target.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const FAILURE_THRESHOLD: u32 = 5;
const RESET_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
}

/// Lock-free circuit breaker suitable for sharing across concurrently-polled workloads.
pub struct CircuitBreaker {
    consecutive_failures: AtomicU32,
    opened_at_secs: AtomicU64,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            opened_at_secs: AtomicU64::new(0),
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state, accounting for the 60s auto-reset.
    pub fn state(&self) -> CircuitState {
        let opened_at = self.opened_at_secs.load(Ordering::Acquire);
        if opened_at == 0 {
            return CircuitState::Closed;
        }
        if now_secs().saturating_sub(opened_at) >= RESET_AFTER.as_secs() {
            CircuitState::Closed
        } else {
            CircuitState::Open
        }
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        self.opened_at_secs.store(0, Ordering::Release);
    }

    /// Records a failure, opening the circuit once the threshold is crossed. Returns the
    /// resulting state.
    pub fn record_failure(&self) -> CircuitState {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= FAILURE_THRESHOLD {
            self.opened_at_secs.store(now_secs(), Ordering::Release);
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_closed_below_threshold() {
        let cb = CircuitBreaker::new();
        for _ in 0..4 {
            assert_eq!(cb.record_failure(), CircuitState::Closed);
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn opens_at_fifth_consecutive_failure() {
        let cb = CircuitBreaker::new();
        for _ in 0..4 {
            cb.record_failure();
        }
        assert_eq!(cb.record_failure(), CircuitState::Open);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn success_resets_failure_count() {
        let cb = CircuitBreaker::new();
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        for _ in 0..4 {
            assert_eq!(cb.record_failure(), CircuitState::Closed);
        }
    }
}
