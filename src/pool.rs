//! Multi-endpoint RPC connection pool: selection, failover, health loop (§4.5).

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::{ErrorCode, SendError, SendResult};
use crate::health::HealthTracker;
use crate::rpc::{EndpointDescriptor, RpcConnection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStrategy {
    WeightedRoundRobin,
    LatencyBased,
}

impl Default for SelectionStrategy {
    fn default() -> Self {
        Self::WeightedRoundRobin
    }
}

/// Multi-endpoint dispatcher: N endpoints, N [`HealthTracker`]s, a selection
/// strategy, and a supervised background health loop.
pub struct ConnectionPool {
    trackers: Vec<Arc<HealthTracker>>,
    strategy: SelectionStrategy,
    round_robin_counter: AtomicU64,
    health_loop: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionPool {
    pub fn new(
        endpoints: Vec<(EndpointDescriptor, Arc<dyn RpcConnection>)>,
        strategy: SelectionStrategy,
        breaker_config: CircuitBreakerConfig,
    ) -> Self {
        let trackers = endpoints
            .into_iter()
            .map(|(endpoint, connection)| Arc::new(HealthTracker::new(endpoint, connection, breaker_config.clone())))
            .collect();
        Self {
            trackers,
            strategy,
            round_robin_counter: AtomicU64::new(0),
            health_loop: std::sync::Mutex::new(None),
        }
    }

    pub fn trackers(&self) -> &[Arc<HealthTracker>] {
        &self.trackers
    }

    fn available(&self) -> Vec<&Arc<HealthTracker>> {
        self.trackers.iter().filter(|t| t.breaker().can_execute()).collect()
    }

    /// Select a single connection. Never fails: if every breaker is open,
    /// falls back to the first tracker and emits a warning — `withFallback`
    /// is the path responsible for raising a fatal error.
    pub fn get_connection(&self) -> Arc<dyn RpcConnection> {
        let available = self.available();
        if available.is_empty() {
            tracing::warn!("connection pool: all endpoints unhealthy, falling back to first tracker");
            return self.trackers[0].connection().clone();
        }
        match self.strategy {
            SelectionStrategy::WeightedRoundRobin => self.weighted_round_robin(&available).connection().clone(),
            SelectionStrategy::LatencyBased => self.latency_based(&available).connection().clone(),
        }
    }

    fn weighted_round_robin<'a>(&self, available: &[&'a Arc<HealthTracker>]) -> &'a Arc<HealthTracker> {
        let total_weight: u64 = available.iter().map(|t| t.endpoint().weight as u64).sum();
        let i = self.round_robin_counter.fetch_add(1, Ordering::Relaxed);
        let position = i % total_weight.max(1);
        let mut cumulative = 0u64;
        for tracker in available {
            cumulative += tracker.endpoint().weight as u64;
            if position < cumulative {
                return tracker;
            }
        }
        available[available.len() - 1]
    }

    fn latency_based<'a>(&self, available: &[&'a Arc<HealthTracker>]) -> &'a Arc<HealthTracker> {
        available
            .iter()
            .copied()
            .min_by(|a, b| {
                a.metrics().latency_ema_ms.partial_cmp(&b.metrics().latency_ema_ms).unwrap_or(std::cmp::Ordering::Equal)
            })
            .expect("available is non-empty")
    }

    /// Try every candidate endpoint in order until one succeeds.
    pub async fn with_fallback<T, F, Fut>(&self, mut f: F) -> SendResult<T>
    where
        F: FnMut(Arc<dyn RpcConnection>) -> Fut,
        Fut: Future<Output = SendResult<T>>,
    {
        let available = self.available();
        let candidates: Vec<&Arc<HealthTracker>> =
            if available.is_empty() { self.trackers.iter().collect() } else { available };

        let mut last_error: Option<SendError> = None;
        for tracker in candidates {
            let start = Instant::now();
            match f(tracker.connection().clone()).await {
                Ok(value) => {
                    tracker.record_success(start.elapsed().as_secs_f64() * 1000.0, None);
                    return Ok(value);
                }
                Err(err) => {
                    tracker.record_failure(&err);
                    last_error = Some(err);
                }
            }
        }

        Err(SendError::new(ErrorCode::AllEndpointsUnhealthy, "all endpoints failed").with_cause(
            last_error.unwrap_or_else(|| SendError::new(ErrorCode::AllEndpointsUnhealthy, "no candidates available")),
        ))
    }

    /// Start the periodic health loop (default every 10s). Safe to call once;
    /// a second call replaces the previous loop after stopping it.
    pub fn start_health_loop(self: &Arc<Self>, interval: Duration) {
        self.stop_health_loop();
        let pool = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                pool.run_health_cycle().await;
            }
        });
        *self.health_loop.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
    }

    async fn run_health_cycle(&self) {
        let checks = self.trackers.iter().map(|t| {
            let t = Arc::clone(t);
            async move { t.health_check().await }
        });
        futures::future::join_all(checks).await;

        let highest_slot = self.trackers.iter().map(|t| t.metrics().last_slot).max().unwrap_or(0);
        for tracker in &self.trackers {
            tracker.update_slot_lag(highest_slot);
        }
    }

    fn stop_health_loop(&self) {
        if let Some(handle) = self.health_loop.lock().unwrap_or_else(|p| p.into_inner()).take() {
            handle.abort();
        }
    }

    /// Stop the health loop. Idempotent.
    pub fn destroy(&self) {
        self.stop_health_loop();
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SendResult as Result;
    use async_trait::async_trait;
    use solana_sdk::clock::Slot;
    use solana_sdk::commitment_config::CommitmentConfig;
    use solana_sdk::hash::Hash;
    use solana_sdk::pubkey::Pubkey;
    use solana_sdk::signature::Signature;
    use solana_sdk::transaction::VersionedTransaction;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug)]
    struct StubConnection {
        id: usize,
        fail_always: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RpcConnection for StubConnection {
        async fn get_recent_prioritization_fees(&self, _w: &[Pubkey]) -> Result<Vec<crate::rpc::PrioritizationFeeSample>> {
            Ok(vec![])
        }
        async fn get_latest_blockhash(&self, _c: CommitmentConfig) -> Result<crate::rpc::BlockhashInfo> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_always {
                Err(SendError::new(ErrorCode::Unknown, "stub failure"))
            } else {
                Ok(crate::rpc::BlockhashInfo { blockhash: Hash::default(), last_valid_block_height: self.id as u64 })
            }
        }
        async fn get_block_height(&self, _c: CommitmentConfig) -> Result<u64> {
            Ok(0)
        }
        async fn simulate_transaction(
            &self,
            _tx: &VersionedTransaction,
            _o: crate::rpc::SimulateOptions,
        ) -> Result<crate::rpc::SimulationOutcome> {
            Ok(crate::rpc::SimulationOutcome::default())
        }
        async fn send_transaction(&self, _tx: &VersionedTransaction, _o: crate::rpc::SubmitOptions) -> Result<Signature> {
            Ok(Signature::default())
        }
        async fn get_signature_status(&self, _s: &Signature) -> Result<Option<crate::rpc::SignatureStatus>> {
            Ok(None)
        }
        async fn subscribe_signature(
            &self,
            _s: &Signature,
            _c: CommitmentConfig,
        ) -> Result<Box<dyn crate::rpc::SignatureSubscription>> {
            Err(SendError::new(ErrorCode::Unknown, "unsupported"))
        }
        async fn get_slot(&self, _c: CommitmentConfig) -> Result<Slot> {
            Ok(1)
        }
    }

    fn pool_with(weights: Vec<u32>) -> ConnectionPool {
        let endpoints = weights
            .into_iter()
            .enumerate()
            .map(|(i, w)| {
                let conn: Arc<dyn RpcConnection> =
                    Arc::new(StubConnection { id: i, fail_always: false, calls: Arc::new(AtomicUsize::new(0)) });
                (EndpointDescriptor::new(format!("ep{i}")).with_weight(w), conn)
            })
            .collect();
        ConnectionPool::new(endpoints, SelectionStrategy::WeightedRoundRobin, CircuitBreakerConfig::default())
    }

    #[test]
    fn equal_weights_distribute_in_strict_round_robin() {
        let pool = pool_with(vec![1, 1]);
        let available = pool.available();
        let mut counts = [0usize; 2];
        for _ in 0..10 {
            let picked = pool.weighted_round_robin(&available);
            let idx = pool.trackers.iter().position(|t| Arc::ptr_eq(t, picked)).unwrap();
            counts[idx] += 1;
        }
        assert_eq!(counts[0], 5);
        assert_eq!(counts[1], 5);
    }

    #[tokio::test]
    async fn with_fallback_tries_next_candidate_on_failure() {
        let failing: Arc<dyn RpcConnection> =
            Arc::new(StubConnection { id: 0, fail_always: true, calls: Arc::new(AtomicUsize::new(0)) });
        let ok_calls = Arc::new(AtomicUsize::new(0));
        let ok: Arc<dyn RpcConnection> = Arc::new(StubConnection { id: 1, fail_always: false, calls: ok_calls.clone() });
        let pool = ConnectionPool::new(
            vec![(EndpointDescriptor::new("a"), failing), (EndpointDescriptor::new("b"), ok)],
            SelectionStrategy::WeightedRoundRobin,
            CircuitBreakerConfig::default(),
        );

        let result = pool
            .with_fallback(|conn| async move { conn.get_latest_blockhash(CommitmentConfig::confirmed()).await })
            .await;
        assert!(result.is_ok());
        assert_eq!(ok_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn with_fallback_raises_all_endpoints_unhealthy_when_everything_fails() {
        let a: Arc<dyn RpcConnection> =
            Arc::new(StubConnection { id: 0, fail_always: true, calls: Arc::new(AtomicUsize::new(0)) });
        let b: Arc<dyn RpcConnection> =
            Arc::new(StubConnection { id: 1, fail_always: true, calls: Arc::new(AtomicUsize::new(0)) });
        let pool = ConnectionPool::new(
            vec![(EndpointDescriptor::new("a"), a), (EndpointDescriptor::new("b"), b)],
            SelectionStrategy::WeightedRoundRobin,
            CircuitBreakerConfig::default(),
        );
        let result: Result<()> = pool
            .with_fallback(|conn| async move {
                conn.get_latest_blockhash(CommitmentConfig::confirmed()).await.map(|_| ())
            })
            .await;
        assert_eq!(result.unwrap_err().code(), ErrorCode::AllEndpointsUnhealthy);
    }

    #[test]
    fn destroy_is_idempotent() {
        let pool = pool_with(vec![1]);
        pool.destroy();
        pool.destroy();
    }
}
