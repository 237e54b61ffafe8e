//! TTL-cached blockhash with background refresh and single-flight
//! deduplication of concurrent fetches (§4.6).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use futures::future::{FutureExt, Shared};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::clock::{Clock, MonotonicClock};
use crate::error::{ErrorCode, SendError, SendResult};
use crate::pool::ConnectionPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockhashRecord {
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
    pub fetched_at_millis: u64,
}

type SharedFetch = Shared<Pin<Box<dyn Future<Output = Result<BlockhashRecord, SendError>> + Send>>>;

/// Holds at most one cached record plus at most one in-flight fetch future.
pub struct BlockhashManager {
    pool: Arc<ConnectionPool>,
    ttl: Duration,
    refresh_interval: Duration,
    commitment: CommitmentConfig,
    clock: Arc<dyn Clock>,
    cached: ArcSwapOption<BlockhashRecord>,
    in_flight: AsyncMutex<Option<SharedFetch>>,
    refresh_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl BlockhashManager {
    pub fn new(
        pool: Arc<ConnectionPool>,
        ttl: Duration,
        refresh_interval: Duration,
        commitment: CommitmentConfig,
    ) -> Self {
        Self {
            pool,
            ttl,
            refresh_interval,
            commitment,
            clock: Arc::new(MonotonicClock::default()),
            cached: ArcSwapOption::from(None),
            in_flight: AsyncMutex::new(None),
            refresh_task: std::sync::Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    fn is_stale(&self, record: &BlockhashRecord) -> bool {
        self.clock.now_millis().saturating_sub(record.fetched_at_millis) > self.ttl.as_millis() as u64
    }

    fn raw_cached(&self) -> Option<BlockhashRecord> {
        self.cached.load().as_ref().map(|r| **r)
    }

    /// Returns the cached record only if present and not stale. Never triggers a refresh.
    pub fn get_cached_blockhash(&self) -> Option<BlockhashRecord> {
        match self.raw_cached() {
            Some(record) if !self.is_stale(&record) => Some(record),
            _ => None,
        }
    }

    /// Cached-if-fresh, else delegates to [`Self::refresh_blockhash`].
    pub async fn get_blockhash(self: &Arc<Self>) -> SendResult<BlockhashRecord> {
        if let Some(record) = self.get_cached_blockhash() {
            return Ok(record);
        }
        self.refresh_blockhash().await
    }

    /// Single-flight refresh: concurrent callers before the first fetch
    /// resolves all share the same future and receive the same record.
    pub async fn refresh_blockhash(self: &Arc<Self>) -> SendResult<BlockhashRecord> {
        let fut: SharedFetch = {
            let mut guard = self.in_flight.lock().await;
            match guard.as_ref() {
                Some(existing) => existing.clone(),
                None => {
                    let this = Arc::clone(self);
                    let boxed: Pin<Box<dyn Future<Output = Result<BlockhashRecord, SendError>> + Send>> =
                        Box::pin(async move { this.fetch().await });
                    let shared = boxed.shared();
                    *guard = Some(shared.clone());
                    shared
                }
            }
        };

        let result = fut.await;

        {
            let mut guard = self.in_flight.lock().await;
            *guard = None;
        }

        if let Ok(record) = &result {
            self.cached.store(Some(Arc::new(*record)));
        }

        result
    }

    async fn fetch(&self) -> SendResult<BlockhashRecord> {
        let commitment = self.commitment;
        let clock = Arc::clone(&self.clock);
        self.pool
            .with_fallback(move |conn| {
                let clock = Arc::clone(&clock);
                async move {
                    let info = conn.get_latest_blockhash(commitment).await.map_err(|e| {
                        SendError::new(ErrorCode::BlockhashFetchFailed, "fetch latest blockhash failed").with_cause(e)
                    })?;
                    Ok(BlockhashRecord {
                        blockhash: info.blockhash,
                        last_valid_block_height: info.last_valid_block_height,
                        fetched_at_millis: clock.now_millis(),
                    })
                }
            })
            .await
    }

    /// True iff the current block height is still below the cached
    /// last-valid height. RPC failure returns `false`, never raises.
    pub async fn is_blockhash_valid(&self) -> bool {
        let Some(record) = self.raw_cached() else {
            return false;
        };
        let commitment = self.commitment;
        match self.pool.with_fallback(move |conn| async move { conn.get_block_height(commitment).await }).await {
            Ok(height) => height < record.last_valid_block_height,
            Err(_) => false,
        }
    }

    /// Schedule periodic background refresh. Idempotent — a second call
    /// stops the previous loop before starting a new one.
    pub fn start(self: &Arc<Self>) {
        self.stop_refresh_task();
        let this = Arc::clone(self);
        let interval = self.refresh_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(err) = this.refresh_blockhash().await {
                    tracing::warn!(error = %err, "background blockhash refresh failed, keeping stale cache");
                }
            }
        });
        *self.refresh_task.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
    }

    fn stop_refresh_task(&self) {
        if let Some(handle) = self.refresh_task.lock().unwrap_or_else(|p| p.into_inner()).take() {
            handle.abort();
        }
    }

    /// Cancel the background refresh interval. Idempotent.
    pub fn destroy(&self) {
        self.stop_refresh_task();
    }
}

impl Drop for BlockhashManager {
    fn drop(&mut self) {
        self.stop_refresh_task();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreakerConfig;
    use crate::pool::{ConnectionPool, SelectionStrategy};
    use crate::rpc::{BlockhashInfo, EndpointDescriptor, RpcConnection};
    use async_trait::async_trait;
    use solana_sdk::clock::Slot;
    use solana_sdk::pubkey::Pubkey;
    use solana_sdk::signature::Signature;
    use solana_sdk::transaction::VersionedTransaction;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct CountingConnection {
        calls: Arc<AtomicUsize>,
        delay: Duration,
        last_valid_block_height: u64,
    }

    #[async_trait]
    impl RpcConnection for CountingConnection {
        async fn get_recent_prioritization_fees(&self, _w: &[Pubkey]) -> SendResult<Vec<crate::rpc::PrioritizationFeeSample>> {
            Ok(vec![])
        }
        async fn get_latest_blockhash(&self, _c: CommitmentConfig) -> SendResult<BlockhashInfo> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(BlockhashInfo { blockhash: Hash::new_unique(), last_valid_block_height: self.last_valid_block_height })
        }
        async fn get_block_height(&self, _c: CommitmentConfig) -> SendResult<u64> {
            Ok(10)
        }
        async fn simulate_transaction(
            &self,
            _tx: &VersionedTransaction,
            _o: crate::rpc::SimulateOptions,
        ) -> SendResult<crate::rpc::SimulationOutcome> {
            Ok(crate::rpc::SimulationOutcome::default())
        }
        async fn send_transaction(&self, _tx: &VersionedTransaction, _o: crate::rpc::SubmitOptions) -> SendResult<Signature> {
            Ok(Signature::default())
        }
        async fn get_signature_status(&self, _s: &Signature) -> SendResult<Option<crate::rpc::SignatureStatus>> {
            Ok(None)
        }
        async fn subscribe_signature(
            &self,
            _s: &Signature,
            _c: CommitmentConfig,
        ) -> SendResult<Box<dyn crate::rpc::SignatureSubscription>> {
            Err(SendError::new(ErrorCode::Unknown, "unsupported"))
        }
        async fn get_slot(&self, _c: CommitmentConfig) -> SendResult<Slot> {
            Ok(1)
        }
    }

    fn manager(calls: Arc<AtomicUsize>, delay: Duration, last_valid_block_height: u64) -> Arc<BlockhashManager> {
        let conn: Arc<dyn RpcConnection> = Arc::new(CountingConnection { calls, delay, last_valid_block_height });
        let pool = Arc::new(ConnectionPool::new(
            vec![(EndpointDescriptor::new("a"), conn)],
            SelectionStrategy::WeightedRoundRobin,
            CircuitBreakerConfig::default(),
        ));
        Arc::new(BlockhashManager::new(
            pool,
            Duration::from_millis(60_000),
            Duration::from_millis(30_000),
            CommitmentConfig::confirmed(),
        ))
    }

    #[tokio::test]
    async fn two_sequential_calls_within_ttl_share_one_rpc_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mgr = manager(calls.clone(), Duration::from_millis(0), 100);
        let first = mgr.get_blockhash().await.unwrap();
        let second = mgr.get_blockhash().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ten_concurrent_refreshes_coalesce_into_one_rpc_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mgr = manager(calls.clone(), Duration::from_millis(50), 100);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let mgr = Arc::clone(&mgr);
            handles.push(tokio::spawn(async move { mgr.refresh_blockhash().await.unwrap() }));
        }
        let results: Vec<_> = futures::future::join_all(handles).await.into_iter().map(|r| r.unwrap()).collect();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let first = results[0];
        assert!(results.iter().all(|r| *r == first));
    }

    #[tokio::test]
    async fn is_blockhash_valid_true_when_height_below_last_valid() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mgr = manager(calls, Duration::from_millis(0), 1000);
        mgr.get_blockhash().await.unwrap();
        assert!(mgr.is_blockhash_valid().await);
    }

    #[tokio::test]
    async fn is_blockhash_valid_false_without_cached_record() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mgr = manager(calls, Duration::from_millis(0), 1000);
        assert!(!mgr.is_blockhash_valid().await);
    }

    #[test]
    fn destroy_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mgr = manager(calls, Duration::from_millis(0), 100);
        mgr.destroy();
        mgr.destroy();
    }
}
