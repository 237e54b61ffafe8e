//! Per-endpoint three-state circuit breaker (§4.3).
//!
//! `Closed` accumulates failures in a sliding time window; crossing the
//! threshold opens the breaker. `Open` observationally becomes `HalfOpen`
//! once `resetTimeoutMs` has elapsed since it opened. In `HalfOpen` the
//! next recorded outcome is decisive.

use crate::clock::{Clock, MonotonicClock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "config-serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config-serde", serde(deny_unknown_fields, default))]
pub struct CircuitBreakerConfig {
    pub failure_threshold: usize,
    pub reset_timeout: Duration,
    pub window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_millis(30_000),
            window: Duration::from_millis(60_000),
        }
    }
}

struct Inner {
    state: AtomicU8,
    opened_at_millis: AtomicU64,
    failures: Mutex<VecDeque<u64>>,
}

/// A single endpoint's breaker. Cheaply cloneable; clones share state.
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<Inner>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: AtomicU8::new(STATE_CLOSED),
                opened_at_millis: AtomicU64::new(0),
                failures: Mutex::new(VecDeque::new()),
            }),
            config,
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    /// Override the clock, for deterministic tests.
    #[must_use]
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Applies the observational `Open -> HalfOpen` transition if due, then
    /// returns the current state.
    pub fn current_state(&self) -> CircuitState {
        if self.inner.state.load(Ordering::Acquire) == STATE_OPEN {
            let opened_at = self.inner.opened_at_millis.load(Ordering::Acquire);
            let now = self.clock.now_millis();
            let elapsed = now.saturating_sub(opened_at);
            if elapsed >= self.config.reset_timeout.as_millis() as u64 {
                if self
                    .inner
                    .state
                    .compare_exchange(STATE_OPEN, STATE_HALF_OPEN, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    tracing::debug!("circuit breaker: open -> half-open");
                }
            }
        }
        match self.inner.state.load(Ordering::Acquire) {
            STATE_OPEN => CircuitState::Open,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    pub fn can_execute(&self) -> bool {
        !matches!(self.current_state(), CircuitState::Open)
    }

    pub fn record_success(&self) {
        if self.current_state() == CircuitState::HalfOpen
            && self
                .inner
                .state
                .compare_exchange(STATE_HALF_OPEN, STATE_CLOSED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.inner.failures.lock().unwrap_or_else(|p| p.into_inner()).clear();
            tracing::info!("circuit breaker: half-open -> closed");
        }
    }

    pub fn record_failure(&self) {
        match self.current_state() {
            CircuitState::HalfOpen => {
                if self
                    .inner
                    .state
                    .compare_exchange(STATE_HALF_OPEN, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.inner.opened_at_millis.store(self.clock.now_millis(), Ordering::Release);
                    tracing::warn!("circuit breaker: half-open probe failed -> open");
                }
            }
            _ => {
                let now = self.clock.now_millis();
                let window_ms = self.config.window.as_millis() as u64;
                let count = {
                    let mut failures = self.inner.failures.lock().unwrap_or_else(|p| p.into_inner());
                    failures.retain(|&t| now.saturating_sub(t) <= window_ms);
                    failures.push_back(now);
                    failures.len()
                };
                if count >= self.config.failure_threshold
                    && self
                        .inner
                        .state
                        .compare_exchange(STATE_CLOSED, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    self.inner.opened_at_millis.store(now, Ordering::Release);
                    tracing::error!(failures = count, "circuit breaker: closed -> open");
                }
            }
        }
    }

    pub fn reset(&self) {
        self.inner.state.store(STATE_CLOSED, Ordering::Release);
        self.inner.opened_at_millis.store(0, Ordering::Release);
        self.inner.failures.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }
}
