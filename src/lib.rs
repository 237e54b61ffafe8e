#![forbid(unsafe_code)]

//! # solsend
//!
//! Production-grade Solana transaction submission: a send pipeline that
//! layers priority-fee estimation, multi-endpoint RPC failover, blockhash
//! lifecycle management, classifier-driven retry with full-jitter backoff,
//! and confirmation tracking behind one `send()` call.
//!
//! ## Features
//!
//! - **Send pipeline** composing fee estimation, signing, simulation,
//!   submission and confirmation into a single retry-driven attempt loop
//! - **Connection pool** with weighted round-robin / latency-based
//!   selection, per-endpoint circuit breakers, and automatic failover
//! - **Blockhash manager** with TTL caching, background refresh, and
//!   single-flight deduplication of concurrent fetches
//! - **Retry engine** with classifier-driven retry/resign decisions and
//!   full-jitter exponential backoff
//! - **Confirmation tracker** racing a websocket subscription, a polling
//!   loop, and a timeout
//! - **Typed lifecycle events** published on a broadcast bus for observers
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use solana_sdk::message::{Message, VersionedMessage};
//! use solana_sdk::signature::{Keypair, Signature, Signer};
//! use solana_sdk::system_instruction;
//! use solana_sdk::transaction::VersionedTransaction;
//! use solsend::{RpcConfig, SendOptions, SenderConfig, TransactionSender};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let payer = Arc::new(Keypair::new());
//!     let config = SenderConfig::mainnet_default(
//!         RpcConfig::single("https://api.mainnet-beta.solana.com"),
//!         payer.clone(),
//!     );
//!     let sender = TransactionSender::new(config);
//!
//!     let ix = system_instruction::transfer(&payer.pubkey(), &payer.pubkey(), 1);
//!     let message = Message::new(&[ix], Some(&payer.pubkey()));
//!     let tx = VersionedTransaction {
//!         signatures: vec![Signature::default()],
//!         message: VersionedMessage::Legacy(message),
//!     };
//!
//!     let outcome = sender.send(&tx, SendOptions::default()).await?;
//!     println!("confirmed {} at slot {}", outcome.signature, outcome.slot);
//!     Ok(())
//! }
//! ```

mod backoff;
mod blockhash;
mod bundle;
mod circuit_breaker;
mod classify;
mod clock;
mod config;
mod confirm;
mod error;
mod events;
mod fee;
mod health;
mod jitter;
mod pool;
mod retry;
mod rpc;
mod sender;
mod sleeper;

// Re-exports
pub use backoff::ExponentialBackoff;
pub use blockhash::{BlockhashManager, BlockhashRecord};
pub use bundle::{BundleStatus, BundleSubmitter};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use classify::{classify, Classification};
pub use clock::{Clock, MonotonicClock};
pub use config::{
    BlockhashConfig, PriorityFeeSetting, RpcConfig, RpcEndpoints, SenderConfig, SimulationSetting,
};
pub use confirm::{ConfirmationConfig, ConfirmationOutcome, ConfirmationResult, Confirmer};
pub use error::{ErrorCode, SendError, SendResult};
pub use events::{EventBus, SendEvent};
pub use fee::{FeeConfig, FeeEstimate};
pub use health::HealthTracker;
pub use jitter::full_jitter;
pub use pool::{ConnectionPool, SelectionStrategy};
pub use retry::{OnRetryHook, RetryConfig, RetryContext, RetryEngine, RetryPredicate};
pub use rpc::{
    BlockhashInfo, ConfirmationStatus, EndpointDescriptor, PrioritizationFeeSample, RpcConnection,
    SignatureNotification, SignatureStatus, SignatureSubscription, SimulateOptions, SimulationOutcome,
    SolanaRpcConnection, SubmitOptions,
};
pub use sender::{SendOptions, SendOutcome, TransactionSender};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};

pub mod prelude;
