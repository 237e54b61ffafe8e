//! Confirmation tracker: races subscription / polling / timeout arms,
//! with guaranteed cleanup on every exit path (§4.8).

use std::sync::Arc;
use std::time::{Duration, Instant};

use solana_sdk::clock::Slot;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::signature::Signature;

use crate::events::{EventBus, SendEvent};
use crate::rpc::{ConfirmationStatus, RpcConnection, SignatureSubscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Confirmed,
    Finalized,
    Expired,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ConfirmationResult {
    pub status: ConfirmationOutcome,
    pub slot: Option<Slot>,
    pub error: Option<String>,
    pub latency: Duration,
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "config-serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config-serde", serde(deny_unknown_fields, default))]
pub struct ConfirmationConfig {
    pub commitment: CommitmentConfig,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub use_websocket: bool,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            commitment: CommitmentConfig::confirmed(),
            timeout: Duration::from_millis(60_000),
            poll_interval: Duration::from_millis(2_000),
            use_websocket: true,
        }
    }
}

type ArmResolution = (ConfirmationOutcome, Option<Slot>, Option<String>);

/// Holds the event bus so it can emit `Confirming` before racing. Stateless
/// otherwise — one instance is shared by every `send()` call.
pub struct Confirmer {
    bus: Arc<EventBus>,
}

impl Confirmer {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    /// Never raises: `Expired`/`Failed` are returned as data. Callers (the
    /// send pipeline) decide whether to turn those into errors.
    pub async fn confirm(
        &self,
        conn: &Arc<dyn RpcConnection>,
        signature: Signature,
        last_valid_block_height: u64,
        config: &ConfirmationConfig,
    ) -> ConfirmationResult {
        self.bus.publish(SendEvent::Confirming);
        let start = Instant::now();

        let mut subscription = if config.use_websocket {
            match conn.subscribe_signature(&signature, config.commitment).await {
                Ok(sub) => Some(sub),
                Err(err) => {
                    tracing::warn!(error = %err, "signature subscription setup failed, polling arm is authoritative");
                    None
                }
            }
        } else {
            None
        };
        let subscription_active = subscription.is_some();

        let (status, slot, error) = tokio::select! {
            _ = tokio::time::sleep(config.timeout) => (ConfirmationOutcome::Expired, None, None),
            resolution = subscription_arm(&mut subscription, config.commitment), if subscription_active => resolution,
            resolution = polling_arm(conn, signature, last_valid_block_height, config) => resolution,
        };

        if let Some(mut sub) = subscription.take() {
            sub.unsubscribe().await;
        }

        ConfirmationResult { status, slot, error, latency: start.elapsed() }
    }
}

async fn subscription_arm(
    subscription: &mut Option<Box<dyn SignatureSubscription>>,
    commitment: CommitmentConfig,
) -> ArmResolution {
    let sub = subscription.as_mut().expect("guarded by select!'s `if subscription_active`");
    match sub.recv().await {
        Ok(notification) => {
            if let Some(err) = notification.err {
                (ConfirmationOutcome::Failed, Some(notification.slot), Some(err))
            } else if commitment == CommitmentConfig::finalized() {
                (ConfirmationOutcome::Finalized, Some(notification.slot), None)
            } else {
                (ConfirmationOutcome::Confirmed, Some(notification.slot), None)
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "signature subscription recv failed, deferring to polling arm");
            futures::future::pending().await
        }
    }
}

async fn polling_arm(
    conn: &Arc<dyn RpcConnection>,
    signature: Signature,
    last_valid_block_height: u64,
    config: &ConfirmationConfig,
) -> ArmResolution {
    loop {
        tokio::time::sleep(config.poll_interval).await;

        match conn.get_block_height(config.commitment).await {
            Ok(height) if height > last_valid_block_height => return (ConfirmationOutcome::Expired, None, None),
            Ok(_) => {}
            Err(err) => tracing::debug!(error = %err, "poll: get_block_height failed"),
        }

        match conn.get_signature_status(&signature).await {
            Ok(Some(status)) => {
                if let Some(err) = status.err {
                    return (ConfirmationOutcome::Failed, status.slot, Some(err));
                }
                match status.confirmation_status {
                    Some(ConfirmationStatus::Finalized) => return (ConfirmationOutcome::Finalized, status.slot, None),
                    Some(ConfirmationStatus::Confirmed) | Some(ConfirmationStatus::Processed)
                        if config.commitment != CommitmentConfig::finalized() =>
                    {
                        return (ConfirmationOutcome::Confirmed, status.slot, None);
                    }
                    _ => {}
                }
            }
            Ok(None) => {}
            Err(err) => tracing::debug!(error = %err, "poll: get_signature_status failed"),
        }
    }
}
