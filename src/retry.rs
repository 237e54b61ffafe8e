//! Full-jitter exponential backoff loop driven by the classifier (§4.7).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::backoff::ExponentialBackoff;
use crate::classify::classify;
use crate::clock::{Clock, MonotonicClock};
use crate::error::{ErrorCode, SendError, SendResult};
use crate::jitter::full_jitter;
use crate::sleeper::{Sleeper, TokioSleeper};

pub type RetryPredicate = Arc<dyn Fn(&SendError) -> bool + Send + Sync>;
pub type OnRetryHook = Arc<dyn Fn(SendError, usize, Duration) -> BoxFuture<'static, ()> + Send + Sync>;

/// Passed to each attempt: zero-based attempt index, total planned
/// attempts, elapsed time since the first attempt, and the last error.
#[derive(Debug, Clone)]
pub struct RetryContext {
    pub attempt: usize,
    pub planned_attempts: usize,
    pub elapsed: Duration,
    pub last_error: Option<SendError>,
}

#[derive(Clone)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub retry_predicate: Option<RetryPredicate>,
    pub on_retry: Option<OnRetryHook>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(10_000),
            backoff_multiplier: 2.0,
            retry_predicate: None,
            on_retry: None,
        }
    }
}

impl std::fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("retry_predicate", &self.retry_predicate.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl RetryConfig {
    fn planned_attempts(&self) -> usize {
        self.max_retries + 1
    }
}

/// Drives the retry loop; holds the sleeper/clock seams so tests can run instantly.
pub struct RetryEngine {
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
}

impl Default for RetryEngine {
    fn default() -> Self {
        Self { sleeper: Arc::new(TokioSleeper), clock: Arc::new(MonotonicClock::default()) }
    }
}

impl RetryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    #[must_use]
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Runs `f` up to `config.max_retries + 1` times. A non-retryable
    /// failure short-circuits immediately; exhausting all planned attempts
    /// with retryable errors raises `RetriesExhausted`.
    pub async fn execute<T, F, Fut>(&self, config: &RetryConfig, mut f: F) -> SendResult<T>
    where
        F: FnMut(RetryContext) -> Fut,
        Fut: Future<Output = SendResult<T>>,
    {
        let planned_attempts = config.planned_attempts();
        let start = self.clock.now_millis();
        let mut last_error: Option<SendError> = None;

        for attempt in 0..planned_attempts {
            let elapsed = Duration::from_millis(self.clock.now_millis().saturating_sub(start));
            let ctx = RetryContext { attempt, planned_attempts, elapsed, last_error: last_error.clone() };

            match f(ctx).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt == planned_attempts - 1 {
                        return Err(SendError::new(
                            ErrorCode::RetriesExhausted,
                            format!("gave up after {planned_attempts} attempts"),
                        )
                        .with_cause(err));
                    }

                    let should_retry = match &config.retry_predicate {
                        Some(predicate) => predicate(&err),
                        None => classify(&err).retryable,
                    };
                    if !should_retry {
                        return Err(SendError::new(ErrorCode::NonRetryable, "non-retryable error").with_cause(err));
                    }

                    let backoff = ExponentialBackoff::new(config.base_delay, config.backoff_multiplier, config.max_delay);
                    let capped = backoff.delay(attempt as u32);
                    let delay = full_jitter(capped);

                    if let Some(hook) = &config.on_retry {
                        hook(err.clone(), attempt, delay).await;
                    }

                    last_error = Some(err);
                    self.sleeper.sleep(delay).await;
                }
            }
        }

        unreachable!("loop always returns on its last iteration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sleeper::{InstantSleeper, TrackingSleeper};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn retryable_err() -> SendError {
        SendError::new(ErrorCode::Unknown, "ECONNRESET")
    }

    fn non_retryable_err() -> SendError {
        SendError::new(ErrorCode::Unknown, "insufficient funds")
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt_without_sleeping() {
        let engine = RetryEngine::new().with_sleeper(Arc::new(InstantSleeper));
        let config = RetryConfig::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let result: SendResult<i32> = engine
            .execute(&config, move |_ctx| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_after_retries_invokes_fn_at_most_max_retries_plus_one() {
        let engine = RetryEngine::new().with_sleeper(Arc::new(InstantSleeper));
        let config = RetryConfig { max_retries: 3, ..RetryConfig::default() };
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let result: SendResult<i32> = engine
            .execute(&config, move |_ctx| {
                let calls = calls_clone.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(retryable_err())
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_exhausted_wraps_last_error() {
        let engine = RetryEngine::new().with_sleeper(Arc::new(InstantSleeper));
        let config = RetryConfig { max_retries: 2, ..RetryConfig::default() };
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let result: SendResult<i32> = engine
            .execute(&config, move |_ctx| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(retryable_err())
                }
            })
            .await;
        let err = result.unwrap_err();
        assert_eq!(err.code(), ErrorCode::RetriesExhausted);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_short_circuits_after_one_invocation() {
        let engine = RetryEngine::new().with_sleeper(Arc::new(InstantSleeper));
        let config = RetryConfig::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let result: SendResult<i32> = engine
            .execute(&config, move |_ctx| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(non_retryable_err())
                }
            })
            .await;
        assert_eq!(result.unwrap_err().code(), ErrorCode::NonRetryable);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delay_is_bounded_by_capped_backoff() {
        let sleeper = Arc::new(TrackingSleeper::new());
        let engine = RetryEngine::new().with_sleeper(sleeper.clone());
        let config = RetryConfig {
            max_retries: 2,
            base_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_millis(10_000),
            ..RetryConfig::default()
        };
        let _: SendResult<i32> = engine.execute(&config, |_ctx| async { Err(retryable_err()) }).await;
        assert_eq!(sleeper.calls(), 2);
        assert!(sleeper.call_at(0).unwrap() <= Duration::from_millis(100));
        assert!(sleeper.call_at(1).unwrap() <= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn retry_predicate_overrides_classifier() {
        let engine = RetryEngine::new().with_sleeper(Arc::new(InstantSleeper));
        let config = RetryConfig {
            max_retries: 1,
            retry_predicate: Some(Arc::new(|_err| false)),
            ..RetryConfig::default()
        };
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let result: SendResult<i32> = engine
            .execute(&config, move |_ctx| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(retryable_err())
                }
            })
            .await;
        assert_eq!(result.unwrap_err().code(), ErrorCode::NonRetryable);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn on_retry_hook_receives_error_attempt_and_delay() {
        let engine = RetryEngine::new().with_sleeper(Arc::new(InstantSleeper));
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let config = RetryConfig {
            max_retries: 2,
            on_retry: Some(Arc::new(move |_err, attempt, _delay| {
                let seen = seen_clone.clone();
                Box::pin(async move {
                    seen.lock().unwrap().push(attempt);
                })
            })),
            ..RetryConfig::default()
        };
        let _: SendResult<i32> = engine.execute(&config, |_ctx| async { Err(retryable_err()) }).await;
        assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
    }
}
