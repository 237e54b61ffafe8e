//! Exponential backoff with a configurable multiplier, as used by the retry engine (§4.7).

use std::time::Duration;

/// `delay(attempt) = min(max, base * multiplier^attempt)`, attempt zero-indexed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    base: Duration,
    multiplier: f64,
    max: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, multiplier: f64, max: Duration) -> Self {
        Self { base, multiplier, max }
    }

    /// Compute the capped delay for a zero-indexed attempt number, before jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as f64;
        let scaled = base_ms * self.multiplier.powi(attempt as i32);
        if !scaled.is_finite() || scaled >= self.max.as_millis() as f64 {
            return self.max;
        }
        Duration::from_millis(scaled.max(0.0) as u64).min(self.max)
    }
}
