//! Send pipeline: the orchestrator composing fee estimation, blockhash
//! acquisition, signing, simulation, submission and confirmation into one
//! retry-driven `send()` (§4.9, Component J).

use std::sync::Arc;
use std::time::{Duration, Instant};

use solana_sdk::clock::Slot;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::compute_budget::{self, ComputeBudgetInstruction};
use solana_sdk::hash::Hash;
use solana_sdk::instruction::{AccountMeta, CompiledInstruction, Instruction};
use solana_sdk::message::{Message, VersionedMessage};
use solana_sdk::signature::Signature;
use solana_sdk::signer::Signer;
use solana_sdk::transaction::VersionedTransaction;
use tokio::sync::broadcast;

use crate::blockhash::BlockhashManager;
use crate::classify::classify;
use crate::config::{PriorityFeeSetting, SenderConfig, SimulationSetting};
use crate::confirm::{ConfirmationConfig, ConfirmationOutcome, Confirmer};
use crate::error::{ErrorCode, SendError, SendResult};
use crate::events::{EventBus, SendEvent};
use crate::fee;
use crate::pool::ConnectionPool;
use crate::retry::{OnRetryHook, RetryConfig, RetryContext, RetryEngine};
use crate::rpc::SubmitOptions;

/// Per-send overrides layered on top of [`SenderConfig`]'s defaults.
#[derive(Clone, Default)]
pub struct SendOptions {
    pub priority_fee: Option<PriorityFeeSetting>,
    pub compute_units: Option<u32>,
    pub retry: Option<RetryConfig>,
    pub skip_simulation: bool,
    pub skip_confirmation: bool,
    pub commitment: Option<CommitmentConfig>,
    pub extra_signers: Vec<Arc<dyn Signer + Send + Sync>>,
}

/// The outcome of a successful `send()` (§3 "Send result").
#[derive(Debug, Clone, Copy)]
pub struct SendOutcome {
    pub signature: Signature,
    pub slot: Slot,
    pub commitment: CommitmentConfig,
    /// 1-based: `ctx.attempt + 1` of the attempt that succeeded.
    pub attempts: usize,
    pub latency: Duration,
    pub units_consumed: Option<u64>,
    pub priority_fee: Option<u64>,
}

fn is_compute_budget_instruction(message: &Message, ix: &CompiledInstruction) -> bool {
    message.account_keys.get(ix.program_id_index as usize) == Some(&compute_budget::id())
}

fn decompile_instruction(message: &Message, ix: &CompiledInstruction) -> Instruction {
    let program_id = message.account_keys[ix.program_id_index as usize];
    let accounts = ix
        .accounts
        .iter()
        .map(|&idx| {
            let idx = idx as usize;
            AccountMeta {
                pubkey: message.account_keys[idx],
                is_signer: message.is_signer(idx),
                is_writable: message.is_writable(idx),
            }
        })
        .collect();
    Instruction { program_id, accounts, data: ix.data.clone() }
}

/// Legacy-only compute-budget injection (§4.9). Versioned transactions are
/// returned unchanged — the caller owns their own compute-budget
/// instructions (§9 open question, resolved in DESIGN.md).
fn build_working_message(tx: &VersionedTransaction, fee: Option<u64>, compute_units: u32) -> VersionedMessage {
    match (&tx.message, fee) {
        (VersionedMessage::Legacy(legacy), Some(fee_micro_lamports)) => {
            let mut instructions = vec![
                ComputeBudgetInstruction::set_compute_unit_limit(compute_units),
                ComputeBudgetInstruction::set_compute_unit_price(fee_micro_lamports),
            ];
            instructions.extend(
                legacy
                    .instructions
                    .iter()
                    .filter(|ix| !is_compute_budget_instruction(legacy, ix))
                    .map(|ix| decompile_instruction(legacy, ix)),
            );
            let fee_payer = legacy.account_keys.first().copied();
            VersionedMessage::Legacy(Message::new(&instructions, fee_payer.as_ref()))
        }
        (other, _) => other.clone(),
    }
}

fn with_blockhash(message: &VersionedMessage, blockhash: Hash) -> VersionedMessage {
    match message {
        VersionedMessage::Legacy(m) => {
            let mut m = m.clone();
            m.recent_blockhash = blockhash;
            VersionedMessage::Legacy(m)
        }
        VersionedMessage::V0(m) => {
            let mut m = m.clone();
            m.recent_blockhash = blockhash;
            VersionedMessage::V0(m)
        }
    }
}

fn sign_message(message: VersionedMessage, signers: &[Arc<dyn Signer + Send + Sync>]) -> SendResult<VersionedTransaction> {
    let refs: Vec<&dyn Signer> = signers.iter().map(|s| s.as_ref() as &dyn Signer).collect();
    VersionedTransaction::try_new(message, &refs)
        .map_err(|e| SendError::new(ErrorCode::Unknown, format!("sign transaction: {e}")))
}

/// Owns one pool, one blockhash manager, one confirmer, and the event bus
/// (§3 "Ownership & lifecycle"). `send()` calls are independent — no
/// coordination lock spans concurrent invocations.
pub struct TransactionSender {
    pool: Arc<ConnectionPool>,
    blockhash: Arc<BlockhashManager>,
    confirmer: Confirmer,
    retry_engine: RetryEngine,
    bus: Arc<EventBus>,
    config: SenderConfig,
}

impl TransactionSender {
    pub fn new(config: SenderConfig) -> Arc<Self> {
        let connections = config
            .rpc
            .endpoints
            .descriptors()
            .into_iter()
            .map(|descriptor| {
                let conn: Arc<dyn crate::rpc::RpcConnection> =
                    Arc::new(crate::rpc::SolanaRpcConnection::new(descriptor.url.clone(), Duration::from_millis(30_000)));
                (descriptor, conn)
            })
            .collect();

        let pool = Arc::new(ConnectionPool::new(connections, config.rpc.strategy, config.rpc.circuit_breaker.clone()));
        pool.start_health_loop(config.rpc.health_check_interval);

        let blockhash = Arc::new(BlockhashManager::new(
            Arc::clone(&pool),
            config.blockhash.ttl,
            config.blockhash.refresh_interval,
            config.blockhash.commitment,
        ));
        blockhash.start();

        let bus = Arc::new(EventBus::default());
        let confirmer = Confirmer::new(Arc::clone(&bus));

        Arc::new(Self { pool, blockhash, confirmer, retry_engine: RetryEngine::new(), bus, config })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SendEvent> {
        self.bus.subscribe()
    }

    /// Stop background timers and release listeners. Idempotent.
    pub fn destroy(&self) {
        self.pool.destroy();
        self.blockhash.destroy();
    }

    /// Build the pipeline's own `onRetry` hook: emits `Retrying`, and on a
    /// blockhash-expired classification, force-refreshes the cache and
    /// emits `BlockhashExpired{old,new}` so the next attempt picks up a
    /// fresh hash. Chains into any caller-supplied hook afterwards.
    fn on_retry_hook(&self, max_retries: usize, user_hook: Option<OnRetryHook>) -> OnRetryHook {
        let bus = Arc::clone(&self.bus);
        let blockhash = Arc::clone(&self.blockhash);
        Arc::new(move |err: SendError, attempt: usize, delay: Duration| {
            let bus = Arc::clone(&bus);
            let blockhash = Arc::clone(&blockhash);
            let user_hook = user_hook.clone();
            Box::pin(async move {
                bus.publish(SendEvent::Retrying { attempt, max_retries, error: err.clone(), delay });

                if classify(&err).needs_resign {
                    let old = blockhash.get_cached_blockhash().map(|r| r.blockhash).unwrap_or_default();
                    match blockhash.refresh_blockhash().await {
                        Ok(record) => bus.publish(SendEvent::BlockhashExpired { old, new: record.blockhash }),
                        Err(refresh_err) => {
                            tracing::warn!(error = %refresh_err, "forced blockhash refresh after retry failed");
                        }
                    }
                }

                if let Some(hook) = &user_hook {
                    hook(err, attempt, delay).await;
                }
            })
        })
    }

    pub async fn send(self: &Arc<Self>, tx: &VersionedTransaction, options: SendOptions) -> SendResult<SendOutcome> {
        let started_at = Instant::now();
        let commitment = options.commitment.unwrap_or(self.config.commitment);
        let compute_units = options.compute_units.unwrap_or(self.config.default_compute_units);
        let skip_simulation = options.skip_simulation;
        let skip_confirmation = options.skip_confirmation;
        let simulation = self.config.simulation;

        let priority_fee_setting = options.priority_fee.unwrap_or_else(|| self.config.priority_fee.clone());
        let chosen_fee = match &priority_fee_setting {
            PriorityFeeSetting::Disabled => None,
            PriorityFeeSetting::Static { micro_lamports } => Some(*micro_lamports),
            PriorityFeeSetting::Estimate(fee_config) => {
                Some(fee::estimate_priority_fee(&self.pool, fee_config).await?.chosen_micro_lamports)
            }
        };

        let base_message = build_working_message(tx, chosen_fee, compute_units);

        let mut all_signers = Vec::with_capacity(1 + self.config.extra_signers.len() + options.extra_signers.len());
        all_signers.push(Arc::clone(&self.config.signer));
        all_signers.extend(self.config.extra_signers.iter().cloned());
        all_signers.extend(options.extra_signers);

        let effective_retry = options.retry.unwrap_or_else(|| self.config.retry.clone());
        let max_retries = effective_retry.max_retries;
        let retry_config = RetryConfig {
            on_retry: Some(self.on_retry_hook(max_retries, effective_retry.on_retry.clone())),
            ..effective_retry
        };

        let this = Arc::clone(self);
        let result = self
            .retry_engine
            .execute(&retry_config, move |ctx: RetryContext| {
                let this = Arc::clone(&this);
                let base_message = base_message.clone();
                let all_signers = all_signers.clone();
                async move {
                    this.attempt(
                        ctx,
                        base_message,
                        all_signers,
                        commitment,
                        skip_simulation,
                        skip_confirmation,
                        simulation,
                        chosen_fee,
                        started_at,
                    )
                    .await
                }
            })
            .await;

        // §7: `Failed` is emitted alongside the raised error, not instead of it.
        if let Err(ref error) = result {
            self.bus.publish(SendEvent::Failed { error: error.clone() });
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt(
        &self,
        ctx: RetryContext,
        base_message: VersionedMessage,
        signers: Vec<Arc<dyn Signer + Send + Sync>>,
        commitment: CommitmentConfig,
        skip_simulation: bool,
        skip_confirmation: bool,
        simulation: SimulationSetting,
        chosen_fee: Option<u64>,
        started_at: Instant,
    ) -> SendResult<SendOutcome> {
        let record = self.blockhash.get_blockhash().await?;
        let message = with_blockhash(&base_message, record.blockhash);
        let signed_tx = sign_message(message, &signers)?;

        let mut units_consumed: Option<u64> = None;
        if let SimulationSetting::Enabled(sim_options) = simulation {
            if !skip_simulation {
                let outcome = self
                    .pool
                    .with_fallback(|conn| {
                        let signed_tx = signed_tx.clone();
                        async move { conn.simulate_transaction(&signed_tx, sim_options).await }
                    })
                    .await
                    .map_err(|e| SendError::new(ErrorCode::SimulationFailed, "simulation RPC failed").with_cause(e))?;

                units_consumed = outcome.units_consumed;
                self.bus.publish(SendEvent::Simulated {
                    units_consumed: outcome.units_consumed,
                    logs: outcome.logs.clone(),
                });

                if let Some(sim_error) = outcome.error {
                    return Err(SendError::new(ErrorCode::SimulationFailed, sim_error)
                        .with_context("logs", outcome.logs.join("\n")));
                }
            }
        }

        self.bus.publish(SendEvent::Sending { attempt: ctx.attempt });

        let signature = self
            .pool
            .with_fallback(|conn| {
                let signed_tx = signed_tx.clone();
                async move {
                    conn.send_transaction(&signed_tx, SubmitOptions { skip_preflight: true, max_retries: Some(0) }).await
                }
            })
            .await?;

        self.bus.publish(SendEvent::Sent { signature, attempt: ctx.attempt });

        if skip_confirmation {
            return Ok(SendOutcome {
                signature,
                slot: 0,
                commitment,
                attempts: ctx.attempt + 1,
                latency: started_at.elapsed(),
                units_consumed,
                priority_fee: chosen_fee,
            });
        }

        let conn = self.pool.get_connection();
        let confirmation_config = ConfirmationConfig { commitment, ..self.config.confirmation };
        let confirmation =
            self.confirmer.confirm(&conn, signature, record.last_valid_block_height, &confirmation_config).await;

        match confirmation.status {
            ConfirmationOutcome::Failed => Err(SendError::new(
                ErrorCode::TransactionFailed,
                confirmation.error.unwrap_or_else(|| "transaction failed on-chain".to_string()),
            )),
            ConfirmationOutcome::Expired => {
                Err(SendError::new(ErrorCode::BlockhashExpired, "blockhash expired before confirmation"))
            }
            ConfirmationOutcome::Confirmed | ConfirmationOutcome::Finalized => {
                let slot = confirmation.slot.unwrap_or(0);
                self.bus.publish(SendEvent::Confirmed { slot });
                Ok(SendOutcome {
                    signature,
                    slot,
                    commitment,
                    attempts: ctx.attempt + 1,
                    latency: started_at.elapsed(),
                    units_consumed,
                    priority_fee: chosen_fee,
                })
            }
        }
    }
}
