//! Sender configuration record and presets (§6).

use std::sync::Arc;
use std::time::Duration;

use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::signer::Signer;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::confirm::ConfirmationConfig;
use crate::fee::FeeConfig;
use crate::pool::SelectionStrategy;
use crate::retry::RetryConfig;
use crate::rpc::{EndpointDescriptor, SimulateOptions};

#[derive(Debug, Clone)]
pub enum RpcEndpoints {
    Single(String),
    Multiple(Vec<EndpointDescriptor>),
}

impl RpcEndpoints {
    pub fn descriptors(&self) -> Vec<EndpointDescriptor> {
        match self {
            Self::Single(url) => vec![EndpointDescriptor::new(url.clone())],
            Self::Multiple(endpoints) => endpoints.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub endpoints: RpcEndpoints,
    pub strategy: SelectionStrategy,
    pub health_check_interval: Duration,
    pub health_check_commitment: CommitmentConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl RpcConfig {
    pub fn single(url: impl Into<String>) -> Self {
        Self {
            endpoints: RpcEndpoints::Single(url.into()),
            strategy: SelectionStrategy::default(),
            health_check_interval: Duration::from_millis(10_000),
            health_check_commitment: CommitmentConfig::confirmed(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }

    pub fn multiple(endpoints: Vec<EndpointDescriptor>) -> Self {
        Self { endpoints: RpcEndpoints::Multiple(endpoints), ..Self::single(String::new()) }
    }
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "config-serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config-serde", serde(deny_unknown_fields, default))]
pub struct BlockhashConfig {
    pub ttl: Duration,
    pub refresh_interval: Duration,
    pub commitment: CommitmentConfig,
}

impl Default for BlockhashConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_millis(60_000),
            refresh_interval: Duration::from_millis(30_000),
            commitment: CommitmentConfig::confirmed(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum PriorityFeeSetting {
    Disabled,
    Estimate(FeeConfig),
    /// Per-send static override: skip estimation, pay this exact amount.
    Static { micro_lamports: u64 },
}

impl Default for PriorityFeeSetting {
    fn default() -> Self {
        Self::Estimate(FeeConfig::default())
    }
}

#[derive(Debug, Clone, Copy)]
pub enum SimulationSetting {
    Disabled,
    Enabled(SimulateOptions),
}

impl Default for SimulationSetting {
    fn default() -> Self {
        Self::Enabled(SimulateOptions::default())
    }
}

/// Recognized configuration. Unknown options are rejected when constructed
/// via `config-serde` deserialization on the nested plain-data records;
/// `signer`/`extraSigners` stay as trait objects outside serde's reach.
#[derive(Clone)]
pub struct SenderConfig {
    pub rpc: RpcConfig,
    pub signer: Arc<dyn Signer + Send + Sync>,
    pub extra_signers: Vec<Arc<dyn Signer + Send + Sync>>,
    pub retry: RetryConfig,
    pub priority_fee: PriorityFeeSetting,
    pub simulation: SimulationSetting,
    pub confirmation: ConfirmationConfig,
    pub blockhash: BlockhashConfig,
    pub commitment: CommitmentConfig,
    pub default_compute_units: u32,
}

impl std::fmt::Debug for SenderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SenderConfig")
            .field("rpc", &self.rpc)
            .field("signer", &self.signer.pubkey())
            .field("extra_signers", &self.extra_signers.len())
            .field("retry", &self.retry)
            .field("priority_fee", &self.priority_fee)
            .field("simulation", &self.simulation)
            .field("confirmation", &self.confirmation)
            .field("blockhash", &self.blockhash)
            .field("commitment", &self.commitment)
            .field("default_compute_units", &self.default_compute_units)
            .finish()
    }
}

impl SenderConfig {
    pub fn new(rpc: RpcConfig, signer: Arc<dyn Signer + Send + Sync>) -> Self {
        Self {
            rpc,
            signer,
            extra_signers: Vec::new(),
            retry: RetryConfig::default(),
            priority_fee: PriorityFeeSetting::default(),
            simulation: SimulationSetting::default(),
            confirmation: ConfirmationConfig::default(),
            blockhash: BlockhashConfig::default(),
            commitment: CommitmentConfig::confirmed(),
            default_compute_units: 200_000,
        }
    }

    /// Conservative preset for mainnet production traffic: the documented defaults.
    pub fn mainnet_default(rpc: RpcConfig, signer: Arc<dyn Signer + Send + Sync>) -> Self {
        Self::new(rpc, signer)
    }

    /// Preset for latency-sensitive senders: tighter TTLs, faster polling, higher fee ceiling.
    pub fn aggressive(rpc: RpcConfig, signer: Arc<dyn Signer + Send + Sync>) -> Self {
        let mut config = Self::new(rpc, signer);
        config.retry = RetryConfig {
            max_retries: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_millis(4_000),
            backoff_multiplier: 2.0,
            ..RetryConfig::default()
        };
        config.blockhash = BlockhashConfig {
            ttl: Duration::from_millis(20_000),
            refresh_interval: Duration::from_millis(10_000),
            ..BlockhashConfig::default()
        };
        config.confirmation = ConfirmationConfig {
            timeout: Duration::from_millis(20_000),
            poll_interval: Duration::from_millis(500),
            ..ConfirmationConfig::default()
        };
        if let PriorityFeeSetting::Estimate(ref mut fee) = config.priority_fee {
            fee.target_percentile = 90;
            fee.max_micro_lamports = 5_000_000;
        }
        config
    }
}
