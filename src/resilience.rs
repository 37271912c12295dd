//! Circuit breaker shared by the LLM client (C4) and the publisher (C13).
//!
//! Closed/Open/HalfOpen state machine with a failure-count threshold and a
//! cooldown before probing the upstream again.

use std::time::{Duration, Instant};

use parking_lot::RwLock;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    Closed,
    Open { opened_at: Instant },
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: RwLock<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
            }),
        }
    }

    /// Whether a call should be attempted right now. A half-open probe is
    /// allowed once the cooldown has elapsed since the circuit opened.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.write();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open { opened_at } => {
                if opened_at.elapsed() >= self.config.cooldown {
                    inner.state = CircuitState::HalfOpen;
                    tracing::info!("circuit breaker entering half-open state");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.write();
        inner.failure_count = 0;
        if inner.state != CircuitState::Closed {
            tracing::info!("circuit breaker closed after successful probe");
        }
        inner.state = CircuitState::Closed;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.write();
        inner.failure_count += 1;

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open {
                    opened_at: Instant::now(),
                };
                tracing::warn!("circuit breaker reopened after failed probe");
            }
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                inner.state = CircuitState::Open {
                    opened_at: Instant::now(),
                };
                tracing::warn!(
                    failures = inner.failure_count,
                    "circuit breaker opened after repeated failures"
                );
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.read().state
    }
}

/// Exponential backoff with jitter for retry loops (shared grammar used by
/// both the LLM client and the publisher's per-target retry).
pub fn backoff_delay(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let exp = initial.as_millis() as f64 * 2f64.powi(attempt as i32 - 1);
    let capped = exp.min(max.as_millis() as f64);
    let jitter = rand::random::<f64>() * 0.2 * capped;
    Duration::from_millis((capped - capped * 0.1 + jitter) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
        });
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert!(!breaker.allow_request());
    }

    #[test]
    fn half_opens_after_cooldown() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            cooldown: Duration::from_millis(1),
        });
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(5));
        assert!(breaker.allow_request());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn success_resets_failure_count() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
        });
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.allow_request());
    }

    #[test]
    fn backoff_grows_and_stays_within_max() {
        let max = Duration::from_secs(5);
        for attempt in 1..=10 {
            let d = backoff_delay(attempt, Duration::from_millis(100), max);
            assert!(d <= max + Duration::from_millis(1));
        }
    }
}
