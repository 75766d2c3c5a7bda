//! Circuit breaker for the LLM provider.
//!
//! CLOSED → OPEN after a threshold of consecutive failures; OPEN requests
//! fail without touching the network. After the cooldown a single probe is
//! allowed (HALF_OPEN); one success closes the circuit, one failure
//! re-opens it.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
enum Inner {
    Closed { consecutive_failures: u32 },
    Open { until: Instant },
    HalfOpen { probe_taken: bool },
}

pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::Closed {
                consecutive_failures: 0,
            }),
            threshold: threshold.max(1),
            cooldown,
        }
    }

    pub fn state(&self) -> BreakerState {
        match *self.inner.lock() {
            Inner::Closed { .. } => BreakerState::Closed,
            Inner::Open { .. } => BreakerState::Open,
            Inner::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }

    /// Whether a request may proceed right now.
    ///
    /// Transitions OPEN → HALF_OPEN when the cooldown has elapsed, and in
    /// HALF_OPEN admits exactly one probe.
    pub fn admit(&self) -> bool {
        let mut inner = self.inner.lock();
        match &mut *inner {
            Inner::Closed { .. } => true,
            Inner::Open { until } => {
                if Instant::now() >= *until {
                    info!("llm circuit breaker half-open, probing");
                    *inner = Inner::HalfOpen { probe_taken: true };
                    true
                } else {
                    false
                }
            }
            Inner::HalfOpen { probe_taken } => {
                if *probe_taken {
                    false
                } else {
                    *probe_taken = true;
                    true
                }
            }
        }
    }

    pub fn on_success(&self) {
        let mut inner = self.inner.lock();
        if matches!(*inner, Inner::HalfOpen { .. }) {
            info!("llm circuit breaker closed");
        }
        *inner = Inner::Closed {
            consecutive_failures: 0,
        };
    }

    pub fn on_failure(&self) {
        let mut inner = self.inner.lock();
        match &mut *inner {
            Inner::Closed {
                consecutive_failures,
            } => {
                *consecutive_failures += 1;
                if *consecutive_failures >= self.threshold {
                    warn!(
                        failures = *consecutive_failures,
                        cooldown_secs = self.cooldown.as_secs(),
                        "llm circuit breaker open"
                    );
                    *inner = Inner::Open {
                        until: Instant::now() + self.cooldown,
                    };
                }
            }
            Inner::HalfOpen { .. } => {
                warn!("llm circuit breaker probe failed, re-opening");
                *inner = Inner::Open {
                    until: Instant::now() + self.cooldown,
                };
            }
            Inner::Open { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        breaker.on_failure();
        breaker.on_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.on_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.admit());
    }

    #[test]
    fn success_resets_the_failure_streak() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        breaker.on_failure();
        breaker.on_failure();
        breaker.on_success();
        breaker.on_failure();
        breaker.on_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_admits_exactly_one_probe() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0));
        breaker.on_failure();
        // Cooldown of zero: first admit transitions to half-open.
        assert!(breaker.admit());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert!(!breaker.admit());
    }

    #[test]
    fn probe_outcome_decides_next_state() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0));
        breaker.on_failure();
        assert!(breaker.admit());
        breaker.on_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        assert!(breaker.admit());
        breaker.on_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }
}
