//! RPC collaborator seam (§6 "RPC collaborators consumed") and a concrete
//! adapter over the nonblocking Solana RPC client.
//!
//! The pool, blockhash manager, fee estimator and confirmation tracker all
//! talk to an endpoint exclusively through [`RpcConnection`] — no component
//! above this module touches `solana_client` directly.

use async_trait::async_trait;
use solana_sdk::clock::Slot;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use std::fmt;
use std::time::Duration;

use crate::error::{ErrorCode, SendError, SendResult};

/// One RPC endpoint's static description: address, weight for weighted-RR,
/// and an optional human label used in reports.
#[derive(Debug, Clone)]
pub struct EndpointDescriptor {
    pub url: String,
    pub weight: u32,
    pub label: Option<String>,
}

impl EndpointDescriptor {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), weight: 1, label: None }
    }

    #[must_use]
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight.max(1);
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.url)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockhashInfo {
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
}

#[derive(Debug, Clone, Default)]
pub struct SimulationOutcome {
    pub error: Option<String>,
    pub logs: Vec<String>,
    pub units_consumed: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationStatus {
    Processed,
    Confirmed,
    Finalized,
}

#[derive(Debug, Clone)]
pub struct SignatureStatus {
    pub slot: Option<Slot>,
    pub err: Option<String>,
    pub confirmation_status: Option<ConfirmationStatus>,
}

#[derive(Debug, Clone, Copy)]
pub struct PrioritizationFeeSample {
    pub slot: Slot,
    pub prioritization_fee: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitOptions {
    pub skip_preflight: bool,
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
pub struct SimulateOptions {
    pub commitment: CommitmentConfig,
    pub replace_recent_blockhash: bool,
    pub sig_verify: bool,
}

impl Default for SimulateOptions {
    fn default() -> Self {
        Self {
            commitment: CommitmentConfig::confirmed(),
            replace_recent_blockhash: true,
            sig_verify: false,
        }
    }
}

/// A single notification delivered while subscribed to a signature.
#[derive(Debug, Clone)]
pub struct SignatureNotification {
    pub err: Option<String>,
    pub slot: Slot,
}

/// A live signature subscription. Dropping it (or calling `unsubscribe`)
/// tears down the underlying stream; failures doing so are swallowed by
/// callers per §4.8's cleanup contract.
#[async_trait]
pub trait SignatureSubscription: Send {
    async fn recv(&mut self) -> SendResult<SignatureNotification>;
    async fn unsubscribe(&mut self);
}

/// The RPC operations the pipeline needs from a connected endpoint (§6).
#[async_trait]
pub trait RpcConnection: Send + Sync + fmt::Debug {
    async fn get_recent_prioritization_fees(
        &self,
        writable_accounts: &[Pubkey],
    ) -> SendResult<Vec<PrioritizationFeeSample>>;

    async fn get_latest_blockhash(&self, commitment: CommitmentConfig) -> SendResult<BlockhashInfo>;

    async fn get_block_height(&self, commitment: CommitmentConfig) -> SendResult<u64>;

    async fn simulate_transaction(
        &self,
        tx: &VersionedTransaction,
        options: SimulateOptions,
    ) -> SendResult<SimulationOutcome>;

    async fn send_transaction(
        &self,
        tx: &VersionedTransaction,
        options: SubmitOptions,
    ) -> SendResult<Signature>;

    async fn get_signature_status(&self, signature: &Signature) -> SendResult<Option<SignatureStatus>>;

    /// Subscribe to notifications for a signature at the given commitment.
    /// Implementations that lack a push channel may fall back to polling
    /// internally — callers only observe the [`SignatureSubscription`] seam.
    async fn subscribe_signature(
        &self,
        signature: &Signature,
        commitment: CommitmentConfig,
    ) -> SendResult<Box<dyn SignatureSubscription>>;

    async fn get_slot(&self, commitment: CommitmentConfig) -> SendResult<Slot>;
}

/// Adapter over `solana_client::nonblocking::rpc_client::RpcClient`.
///
/// Signature subscriptions are implemented by polling `get_signature_statuses`
/// on a short interval rather than opening a separate websocket pubsub
/// connection; the confirmation tracker's own polling arm races it anyway
/// (§4.8), so this keeps the adapter to a single client.
pub struct SolanaRpcConnection {
    client: std::sync::Arc<solana_client::nonblocking::rpc_client::RpcClient>,
    subscription_poll_interval: Duration,
}

impl fmt::Debug for SolanaRpcConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SolanaRpcConnection").finish_non_exhaustive()
    }
}

impl SolanaRpcConnection {
    pub fn new(rpc_url: impl Into<String>, timeout: Duration) -> Self {
        let client = solana_client::nonblocking::rpc_client::RpcClient::new_with_timeout(rpc_url.into(), timeout);
        Self { client: std::sync::Arc::new(client), subscription_poll_interval: Duration::from_millis(500) }
    }

    fn wrap(context: &'static str, err: impl std::fmt::Display) -> SendError {
        SendError::new(ErrorCode::Unknown, format!("{context}: {err}"))
    }

    fn map_confirmation_status<T: fmt::Debug>(raw: &Option<T>) -> Option<ConfirmationStatus> {
        raw.as_ref().map(|v| format!("{v:?}")).and_then(|s| match s.as_str() {
            "Processed" => Some(ConfirmationStatus::Processed),
            "Confirmed" => Some(ConfirmationStatus::Confirmed),
            "Finalized" => Some(ConfirmationStatus::Finalized),
            _ => None,
        })
    }
}

#[async_trait]
impl RpcConnection for SolanaRpcConnection {
    async fn get_recent_prioritization_fees(
        &self,
        writable_accounts: &[Pubkey],
    ) -> SendResult<Vec<PrioritizationFeeSample>> {
        let samples = self
            .client
            .get_recent_prioritization_fees(writable_accounts)
            .await
            .map_err(|e| Self::wrap("get_recent_prioritization_fees", e))?;
        Ok(samples
            .into_iter()
            .map(|s| PrioritizationFeeSample { slot: s.slot, prioritization_fee: s.prioritization_fee })
            .collect())
    }

    async fn get_latest_blockhash(&self, commitment: CommitmentConfig) -> SendResult<BlockhashInfo> {
        let (blockhash, last_valid_block_height) = self
            .client
            .get_latest_blockhash_with_commitment(commitment)
            .await
            .map_err(|e| Self::wrap("get_latest_blockhash", e))?;
        Ok(BlockhashInfo { blockhash, last_valid_block_height })
    }

    async fn get_block_height(&self, commitment: CommitmentConfig) -> SendResult<u64> {
        self.client
            .get_block_height_with_commitment(commitment)
            .await
            .map_err(|e| Self::wrap("get_block_height", e))
    }

    async fn simulate_transaction(
        &self,
        tx: &VersionedTransaction,
        options: SimulateOptions,
    ) -> SendResult<SimulationOutcome> {
        use solana_client::rpc_config::RpcSimulateTransactionConfig;
        let config = RpcSimulateTransactionConfig {
            sig_verify: options.sig_verify,
            replace_recent_blockhash: options.replace_recent_blockhash,
            commitment: Some(options.commitment),
            ..RpcSimulateTransactionConfig::default()
        };
        let response = self
            .client
            .simulate_transaction_with_config(tx, config)
            .await
            .map_err(|e| Self::wrap("simulate_transaction", e))?;
        let value = response.value;
        Ok(SimulationOutcome {
            error: value.err.map(|e| e.to_string()),
            logs: value.logs.unwrap_or_default(),
            units_consumed: value.units_consumed,
        })
    }

    async fn send_transaction(
        &self,
        tx: &VersionedTransaction,
        options: SubmitOptions,
    ) -> SendResult<Signature> {
        use solana_client::rpc_config::RpcSendTransactionConfig;
        let config = RpcSendTransactionConfig {
            skip_preflight: options.skip_preflight,
            max_retries: options.max_retries.map(|n| n as usize),
            ..RpcSendTransactionConfig::default()
        };
        self.client
            .send_transaction_with_config(tx, config)
            .await
            .map_err(|e| Self::wrap("send_transaction", e))
    }

    async fn get_signature_status(&self, signature: &Signature) -> SendResult<Option<SignatureStatus>> {
        let statuses = self
            .client
            .get_signature_statuses(std::slice::from_ref(signature))
            .await
            .map_err(|e| Self::wrap("get_signature_statuses", e))?;
        let Some(status) = statuses.value.into_iter().next().flatten() else {
            return Ok(None);
        };
        let confirmation_status = Self::map_confirmation_status(&status.confirmation_status);
        Ok(Some(SignatureStatus {
            slot: Some(status.slot),
            err: status.err.map(|e| e.to_string()),
            confirmation_status,
        }))
    }

    async fn subscribe_signature(
        &self,
        signature: &Signature,
        commitment: CommitmentConfig,
    ) -> SendResult<Box<dyn SignatureSubscription>> {
        Ok(Box::new(PollingSignatureSubscription {
            client: self.client.clone(),
            signature: *signature,
            commitment,
            interval: self.subscription_poll_interval,
            done: false,
        }))
    }

    async fn get_slot(&self, commitment: CommitmentConfig) -> SendResult<Slot> {
        self.client.get_slot_with_commitment(commitment).await.map_err(|e| Self::wrap("get_slot", e))
    }
}

struct PollingSignatureSubscription {
    client: std::sync::Arc<solana_client::nonblocking::rpc_client::RpcClient>,
    signature: Signature,
    commitment: CommitmentConfig,
    interval: Duration,
    done: bool,
}

#[async_trait]
impl SignatureSubscription for PollingSignatureSubscription {
    async fn recv(&mut self) -> SendResult<SignatureNotification> {
        if self.done {
            return Err(SendError::new(ErrorCode::Unknown, "signature subscription already resolved"));
        }
        loop {
            let statuses = self
                .client
                .get_signature_statuses(std::slice::from_ref(&self.signature))
                .await
                .map_err(|e| SendError::new(ErrorCode::Unknown, format!("poll signature status: {e}")))?;
            if let Some(Some(status)) = statuses.value.into_iter().next() {
                let target_met = match SolanaRpcConnection::map_confirmation_status(&status.confirmation_status) {
                    Some(ConfirmationStatus::Finalized) => true,
                    Some(ConfirmationStatus::Confirmed) => self.commitment != CommitmentConfig::finalized(),
                    _ => false,
                };
                if status.err.is_some() || target_met {
                    self.done = true;
                    return Ok(SignatureNotification { err: status.err.map(|e| e.to_string()), slot: status.slot });
                }
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    async fn unsubscribe(&mut self) {
        self.done = true;
    }
}
