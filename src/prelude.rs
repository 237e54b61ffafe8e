//! Convenient re-exports for common solsend types.
pub use crate::{
    blockhash::{BlockhashManager, BlockhashRecord},
    bundle::{BundleStatus, BundleSubmitter},
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState},
    classify::{classify, Classification},
    config::{
        BlockhashConfig, PriorityFeeSetting, RpcConfig, RpcEndpoints, SenderConfig, SimulationSetting,
    },
    confirm::{ConfirmationConfig, ConfirmationOutcome, ConfirmationResult, Confirmer},
    error::{ErrorCode, SendError, SendResult},
    events::{EventBus, SendEvent},
    fee::{FeeConfig, FeeEstimate},
    pool::{ConnectionPool, SelectionStrategy},
    retry::{RetryConfig, RetryContext, RetryEngine},
    rpc::{EndpointDescriptor, RpcConnection, SimulateOptions, SolanaRpcConnection, SubmitOptions},
    sender::{SendOptions, SendOutcome, TransactionSender},
};
