//! Per-endpoint health metrics + breaker wrapper (§4.4).

use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::classify::classify;
use crate::error::SendError;
use crate::rpc::{EndpointDescriptor, RpcConnection};
use solana_sdk::commitment_config::CommitmentConfig;

const LATENCY_EMA_ALPHA: f64 = 0.3;

/// A point-in-time snapshot of one endpoint's health. Distinct object per
/// call to [`HealthTracker::metrics`] — callers must not observe mutation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthMetrics {
    pub latency_ema_ms: f64,
    pub success_count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub last_slot: u64,
    pub slot_lag: u64,
    pub last_success_millis: Option<u64>,
    pub circuit_state: CircuitState,
}

#[derive(Debug, Clone, Default)]
struct Inner {
    latency_ema_ms: Option<f64>,
    success_count: u64,
    error_count: u64,
    last_slot: u64,
    slot_lag: u64,
    last_success_millis: Option<u64>,
}

/// Wraps one endpoint, its breaker, and its live connection handle.
pub struct HealthTracker {
    endpoint: EndpointDescriptor,
    connection: Arc<dyn RpcConnection>,
    breaker: CircuitBreaker,
    inner: Mutex<Inner>,
    started_at: Instant,
}

impl HealthTracker {
    pub fn new(endpoint: EndpointDescriptor, connection: Arc<dyn RpcConnection>, breaker_config: CircuitBreakerConfig) -> Self {
        Self {
            endpoint,
            connection,
            breaker: CircuitBreaker::new(breaker_config),
            inner: Mutex::new(Inner::default()),
            started_at: Instant::now(),
        }
    }

    pub fn endpoint(&self) -> &EndpointDescriptor {
        &self.endpoint
    }

    pub fn connection(&self) -> &Arc<dyn RpcConnection> {
        &self.connection
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Record a successful call: updates latency EMA, last-slot (if
    /// provided), last-success timestamp, and routes to the breaker.
    pub fn record_success(&self, latency_ms: f64, slot: Option<u64>) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.latency_ema_ms = Some(match inner.latency_ema_ms {
            None => latency_ms,
            Some(prev) => LATENCY_EMA_ALPHA * latency_ms + (1.0 - LATENCY_EMA_ALPHA) * prev,
        });
        if let Some(slot) = slot {
            inner.last_slot = slot;
        }
        inner.success_count += 1;
        inner.last_success_millis = Some(self.started_at.elapsed().as_millis() as u64);
        drop(inner);
        self.breaker.record_success();
    }

    /// Record a failed call: increments the error count and routes to the breaker.
    pub fn record_failure(&self, _err: &SendError) {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).error_count += 1;
        self.breaker.record_failure();
    }

    /// `slotLag = highestSlot - lastSlot`. Before any success, `lastSlot` is
    /// 0, so the first update reports `highestSlot` itself.
    pub fn update_slot_lag(&self, highest_slot: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.slot_lag = highest_slot.saturating_sub(inner.last_slot);
    }

    pub fn metrics(&self) -> HealthMetrics {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner()).clone();
        let error_rate = if inner.success_count + inner.error_count == 0 {
            0.0
        } else {
            inner.error_count as f64 / (inner.success_count + inner.error_count) as f64
        };
        HealthMetrics {
            latency_ema_ms: inner.latency_ema_ms.unwrap_or(0.0),
            success_count: inner.success_count,
            error_count: inner.error_count,
            error_rate,
            last_slot: inner.last_slot,
            slot_lag: inner.slot_lag,
            last_success_millis: inner.last_success_millis,
            circuit_state: self.breaker.current_state(),
        }
    }

    /// Low-cost slot query feeding the same success/failure paths as real traffic.
    pub async fn health_check(&self) {
        let start = Instant::now();
        match self.connection.get_slot(CommitmentConfig::confirmed()).await {
            Ok(slot) => {
                self.record_success(start.elapsed().as_secs_f64() * 1000.0, Some(slot));
            }
            Err(err) => {
                let classification = classify(&err);
                tracing::warn!(endpoint = self.endpoint.display_name(), retryable = classification.retryable, "health check failed");
                self.record_failure(&err);
            }
        }
    }
}
