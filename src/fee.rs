//! Priority-fee estimator: nearest-rank percentile over recent samples (§4.2).

use solana_sdk::pubkey::Pubkey;

use crate::error::{ErrorCode, SendError, SendResult};
use crate::pool::ConnectionPool;

#[derive(Debug, Clone)]
#[cfg_attr(feature = "config-serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config-serde", serde(deny_unknown_fields, default))]
pub struct FeeConfig {
    pub target_percentile: u8,
    pub min_micro_lamports: u64,
    pub max_micro_lamports: u64,
    pub writable_accounts: Vec<Pubkey>,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            target_percentile: 75,
            min_micro_lamports: 1_000,
            max_micro_lamports: 1_000_000,
            writable_accounts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEstimate {
    pub chosen_micro_lamports: u64,
    pub p50: u64,
    pub p75: u64,
    pub p90: u64,
    pub sample_count: usize,
}

/// `index = ceil(p/100 * n) - 1`, clamped to `[0, n-1]`.
fn nearest_rank(sorted: &[u64], percentile: u8) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let n = sorted.len();
    let raw = (percentile as f64 / 100.0 * n as f64).ceil() as i64 - 1;
    let idx = raw.clamp(0, n as i64 - 1) as usize;
    sorted[idx]
}

pub async fn estimate_priority_fee(pool: &ConnectionPool, config: &FeeConfig) -> SendResult<FeeEstimate> {
    let writable = config.writable_accounts.clone();
    let samples = pool
        .with_fallback(move |conn| {
            let writable = writable.clone();
            async move { conn.get_recent_prioritization_fees(&writable).await }
        })
        .await
        .map_err(|e| {
            SendError::new(ErrorCode::FeeEstimationFailed, "fetch recent prioritization fees failed").with_cause(e)
        })?;

    let mut fees: Vec<u64> = samples.iter().map(|s| s.prioritization_fee).filter(|&f| f > 0).collect();
    fees.sort_unstable();

    if fees.is_empty() {
        return Ok(FeeEstimate {
            chosen_micro_lamports: config.min_micro_lamports,
            p50: config.min_micro_lamports,
            p75: config.min_micro_lamports,
            p90: config.min_micro_lamports,
            sample_count: 0,
        });
    }

    let p50 = nearest_rank(&fees, 50);
    let p75 = nearest_rank(&fees, 75);
    let p90 = nearest_rank(&fees, 90);
    let raw_chosen = nearest_rank(&fees, config.target_percentile);
    let chosen = raw_chosen.clamp(config.min_micro_lamports, config.max_micro_lamports);

    Ok(FeeEstimate { chosen_micro_lamports: chosen, p50, p75, p90, sample_count: fees.len() })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::circuit_breaker::CircuitBreakerConfig;
    use crate::error::SendResult as Result;
    use crate::pool::SelectionStrategy;
    use crate::rpc::{EndpointDescriptor, PrioritizationFeeSample, RpcConnection};
    use async_trait::async_trait;
    use solana_sdk::clock::Slot;
    use solana_sdk::commitment_config::CommitmentConfig;
    use solana_sdk::hash::Hash;
    use solana_sdk::signature::Signature;
    use solana_sdk::transaction::VersionedTransaction;

    #[derive(Debug)]
    struct SampleConnection {
        fees: Vec<u64>,
    }

    #[async_trait]
    impl RpcConnection for SampleConnection {
        async fn get_recent_prioritization_fees(&self, _w: &[Pubkey]) -> Result<Vec<PrioritizationFeeSample>> {
            Ok(self.fees.iter().map(|&f| PrioritizationFeeSample { slot: 1, prioritization_fee: f }).collect())
        }
        async fn get_latest_blockhash(&self, _c: CommitmentConfig) -> Result<crate::rpc::BlockhashInfo> {
            Ok(crate::rpc::BlockhashInfo { blockhash: Hash::default(), last_valid_block_height: 0 })
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

    fn pool_with_fees(fees: Vec<u64>) -> ConnectionPool {
        let conn: Arc<dyn RpcConnection> = Arc::new(SampleConnection { fees });
        ConnectionPool::new(vec![(EndpointDescriptor::new("a"), conn)], SelectionStrategy::WeightedRoundRobin, CircuitBreakerConfig::default())
    }

    #[tokio::test]
    async fn empty_sample_set_returns_min() {
        let pool = pool_with_fees(vec![]);
        let config = FeeConfig::default();
        let estimate = estimate_priority_fee(&pool, &config).await.unwrap();
        assert_eq!(estimate.chosen_micro_lamports, config.min_micro_lamports);
        assert_eq!(estimate.sample_count, 0);
    }

    #[tokio::test]
    async fn zero_valued_samples_are_discarded() {
        let pool = pool_with_fees(vec![0, 0, 100]);
        let estimate = estimate_priority_fee(&pool, &FeeConfig::default()).await.unwrap();
        assert_eq!(estimate.sample_count, 1);
    }

    #[tokio::test]
    async fn chosen_fee_clamped_to_max() {
        let pool = pool_with_fees(vec![10_000_000; 10]);
        let config = FeeConfig { max_micro_lamports: 1_000_000, ..FeeConfig::default() };
        let estimate = estimate_priority_fee(&pool, &config).await.unwrap();
        assert_eq!(estimate.chosen_micro_lamports, 1_000_000);
    }

    #[tokio::test]
    async fn chosen_fee_clamped_to_min() {
        let pool = pool_with_fees(vec![1; 10]);
        let config = FeeConfig { min_micro_lamports: 5_000, ..FeeConfig::default() };
        let estimate = estimate_priority_fee(&pool, &config).await.unwrap();
        assert_eq!(estimate.chosen_micro_lamports, 5_000);
    }

    #[test]
    fn nearest_rank_matches_spec_formula() {
        let sorted = vec![10, 20, 30, 40, 50, 60, 70, 80, 90, 100];
        assert_eq!(nearest_rank(&sorted, 50), 50);
        assert_eq!(nearest_rank(&sorted, 90), 90);
        assert_eq!(nearest_rank(&sorted, 100), 100);
    }
}
