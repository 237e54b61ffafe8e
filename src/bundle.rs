//! Jito bundle integration seam (Component M). Not a JSON-RPC client —
//! just the trait and status plumbing so the pipeline can be handed one.

use std::fmt;

use async_trait::async_trait;
use solana_sdk::transaction::VersionedTransaction;

use crate::error::SendResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleStatus {
    Pending,
    Landed,
    Failed,
    Dropped,
}

/// A bundle submission collaborator. Implementations own the actual
/// JSON-RPC client, tip-account rotation, and retry policy towards the
/// relayer; this crate only needs to submit and poll status.
#[async_trait]
pub trait BundleSubmitter: Send + Sync + fmt::Debug {
    async fn submit_bundle(&self, transactions: Vec<VersionedTransaction>, tip_micro_lamports: u64) -> SendResult<String>;

    async fn bundle_status(&self, bundle_id: &str) -> SendResult<BundleStatus>;
}
