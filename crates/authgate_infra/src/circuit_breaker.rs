//! Circuit breaker wrapping each downstream dependency call in the gate
//! pipeline (spec §4.1, §5 "Cancellation"): trips open after a failure
//! threshold, half-opens after a cooldown, closes after consecutive
//! successes in half-open state.
//!
//! Mirrors `risk::margin_gate`'s mode-hint shape (`Active -> ReduceOnly ->
//! Kill` as a pure threshold ladder) but generalized to a time-windowed
//! failure count rather than a single ratio.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub failure_window: Duration,
    pub reset_timeout: Duration,
    pub reset_successes: u32,
}

#[derive(Debug, Default)]
pub struct CircuitBreakerMetrics {
    trips_total: u64,
    rejections_total: u64,
    resets_total: u64,
}

impl CircuitBreakerMetrics {
    pub fn trips_total(&self) -> u64 {
        self.trips_total
    }

    pub fn rejections_total(&self) -> u64 {
        self.rejections_total
    }

    pub fn resets_total(&self) -> u64 {
        self.resets_total
    }

    fn record_trip(&mut self) {
        self.trips_total += 1;
    }

    fn record_rejection(&mut self) {
        self.rejections_total += 1;
    }

    fn record_reset(&mut self) {
        self.resets_total += 1;
    }
}

/// A single circuit breaker guarding one dependency (policy, ledger, or
/// audit). Not `Sync` by itself; callers wrap it in their own mutex the way
/// `LedgerStore` wraps positions.
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: BreakerState,
    failure_times: VecDeque<Instant>,
    opened_at: Option<Instant>,
    half_open_successes: u32,
    metrics: CircuitBreakerMetrics,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::Closed,
            failure_times: VecDeque::new(),
            opened_at: None,
            half_open_successes: 0,
            metrics: CircuitBreakerMetrics::default(),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn metrics(&self) -> &CircuitBreakerMetrics {
        &self.metrics
    }

    /// Whether a call is allowed right now. Transitions `Open -> HalfOpen`
    /// on its own once the reset timeout has elapsed.
    pub fn allow_call(&mut self, now: Instant) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed_since_open = self.opened_at.map(|t| now.duration_since(t));
                if elapsed_since_open.is_some_and(|elapsed| elapsed >= self.config.reset_timeout) {
                    self.state = BreakerState::HalfOpen;
                    self.half_open_successes = 0;
                    true
                } else {
                    self.metrics.record_rejection();
                    false
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        match self.state {
            BreakerState::Closed => {
                self.failure_times.clear();
            }
            BreakerState::HalfOpen => {
                self.half_open_successes += 1;
                if self.half_open_successes >= self.config.reset_successes {
                    self.state = BreakerState::Closed;
                    self.failure_times.clear();
                    self.opened_at = None;
                    self.metrics.record_reset();
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&mut self, now: Instant) {
        match self.state {
            BreakerState::Closed => {
                self.failure_times.push_back(now);
                while let Some(&front) = self.failure_times.front() {
                    if now.duration_since(front) > self.config.failure_window {
                        self.failure_times.pop_front();
                    } else {
                        break;
                    }
                }
                if self.failure_times.len() as u32 >= self.config.failure_threshold {
                    self.trip(now);
                }
            }
            BreakerState::HalfOpen => {
                self.trip(now);
            }
            BreakerState::Open => {}
        }
    }

    fn trip(&mut self, now: Instant) {
        self.state = BreakerState::Open;
        self.opened_at = Some(now);
        self.half_open_successes = 0;
        self.metrics.record_trip();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 5,
            failure_window: Duration::from_secs(30),
            reset_timeout: Duration::from_secs(60),
            reset_successes: 3,
        }
    }

    #[test]
    fn opens_after_threshold_failures_within_window() {
        let mut breaker = CircuitBreaker::new(config());
        let start = Instant::now();
        for i in 0..5 {
            breaker.record_failure(start + Duration::from_secs(i));
        }
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.metrics().trips_total(), 1);
    }

    #[test]
    fn stays_closed_when_failures_fall_outside_window() {
        let mut breaker = CircuitBreaker::new(config());
        let start = Instant::now();
        breaker.record_failure(start);
        breaker.record_failure(start + Duration::from_secs(40));
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn open_breaker_rejects_calls_until_reset_timeout() {
        let mut breaker = CircuitBreaker::new(config());
        let start = Instant::now();
        for i in 0..5 {
            breaker.record_failure(start + Duration::from_secs(i));
        }
        assert!(!breaker.allow_call(start + Duration::from_secs(10)));
        assert!(breaker.allow_call(start + Duration::from_secs(70)));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn half_open_closes_after_consecutive_successes() {
        let mut breaker = CircuitBreaker::new(config());
        let start = Instant::now();
        for i in 0..5 {
            breaker.record_failure(start + Duration::from_secs(i));
        }
        breaker.allow_call(start + Duration::from_secs(70));
        breaker.record_success();
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.metrics().resets_total(), 1);
    }

    #[test]
    fn half_open_failure_reopens_immediately() {
        let mut breaker = CircuitBreaker::new(config());
        let start = Instant::now();
        for i in 0..5 {
            breaker.record_failure(start + Duration::from_secs(i));
        }
        breaker.allow_call(start + Duration::from_secs(70));
        breaker.record_failure(start + Duration::from_secs(71));
        assert_eq!(breaker.state(), BreakerState::Open);
    }
}
