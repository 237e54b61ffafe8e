//! Typed lifecycle publish-subscribe bus (Component K).
//!
//! Adapts the teacher's `telemetry::events::PolicyEvent` shape (a variant
//! type with one `Display` arm per event and an optional JSON projection)
//! to the domain's own event set.

use std::fmt;
use std::time::Duration;

use solana_sdk::clock::Slot;
use solana_sdk::hash::Hash;
use solana_sdk::signature::Signature;
use tokio::sync::broadcast;

#[cfg(feature = "telemetry-json")]
use serde_json::json;

use crate::error::SendError;

#[derive(Debug, Clone, PartialEq)]
pub enum SendEvent {
    Sending { attempt: usize },
    Simulated { units_consumed: Option<u64>, logs: Vec<String> },
    Sent { signature: Signature, attempt: usize },
    Confirming,
    Confirmed { slot: Slot },
    Retrying { attempt: usize, max_retries: usize, error: SendError, delay: Duration },
    BlockhashExpired { old: Hash, new: Hash },
    Failed { error: SendError },
    BundleSubmitted { bundle_id: String },
    BundleConfirmed { bundle_id: String },
    BundleFailed { bundle_id: String, error: SendError },
}

impl fmt::Display for SendEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sending { attempt } => write!(f, "Sending(attempt={attempt})"),
            Self::Simulated { units_consumed, logs } => {
                write!(f, "Simulated(units_consumed={units_consumed:?}, logs={})", logs.len())
            }
            Self::Sent { signature, attempt } => write!(f, "Sent(signature={signature}, attempt={attempt})"),
            Self::Confirming => write!(f, "Confirming"),
            Self::Confirmed { slot } => write!(f, "Confirmed(slot={slot})"),
            Self::Retrying { attempt, max_retries, error, delay } => {
                write!(f, "Retrying(attempt={attempt}/{max_retries}, error={error}, delay={delay:?})")
            }
            Self::BlockhashExpired { old, new } => write!(f, "BlockhashExpired(old={old}, new={new})"),
            Self::Failed { error } => write!(f, "Failed({error})"),
            Self::BundleSubmitted { bundle_id } => write!(f, "BundleSubmitted({bundle_id})"),
            Self::BundleConfirmed { bundle_id } => write!(f, "BundleConfirmed({bundle_id})"),
            Self::BundleFailed { bundle_id, error } => write!(f, "BundleFailed({bundle_id}, {error})"),
        }
    }
}

#[cfg_attr(not(feature = "telemetry-json"), allow(dead_code))]
#[inline]
fn clamp_u64(val: u128) -> u64 {
    val.min(u128::from(u64::MAX)) as u64
}

#[cfg(feature = "telemetry-json")]
pub fn event_to_json(event: &SendEvent) -> serde_json::Value {
    match event {
        SendEvent::Sending { attempt } => json!({ "kind": "sending", "attempt": *attempt }),
        SendEvent::Simulated { units_consumed, logs } => json!({
            "kind": "simulated",
            "units_consumed": *units_consumed,
            "log_count": logs.len(),
        }),
        SendEvent::Sent { signature, attempt } => json!({
            "kind": "sent",
            "signature": signature.to_string(),
            "attempt": *attempt,
        }),
        SendEvent::Confirming => json!({ "kind": "confirming" }),
        SendEvent::Confirmed { slot } => json!({ "kind": "confirmed", "slot": *slot }),
        SendEvent::Retrying { attempt, max_retries, error, delay } => json!({
            "kind": "retrying",
            "attempt": *attempt,
            "max_retries": *max_retries,
            "error": error.to_string(),
            "delay_ms": clamp_u64(delay.as_millis()),
        }),
        SendEvent::BlockhashExpired { old, new } => json!({
            "kind": "blockhash_expired",
            "old": old.to_string(),
            "new": new.to_string(),
        }),
        SendEvent::Failed { error } => json!({ "kind": "failed", "error": error.to_string() }),
        SendEvent::BundleSubmitted { bundle_id } => json!({ "kind": "bundle_submitted", "bundle_id": bundle_id }),
        SendEvent::BundleConfirmed { bundle_id } => json!({ "kind": "bundle_confirmed", "bundle_id": bundle_id }),
        SendEvent::BundleFailed { bundle_id, error } => json!({
            "kind": "bundle_failed",
            "bundle_id": bundle_id,
            "error": error.to_string(),
        }),
    }
}

const DEFAULT_CAPACITY: usize = 256;

/// Single bus shared by all internal components; the sender exposes it
/// read-only to callers via [`EventBus::subscribe`].
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SendEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SendEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. No-op (not an error) if there are no subscribers.
    pub fn publish(&self, event: SendEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish(SendEvent::Sending { attempt: 0 });
        let event = rx.recv().await.unwrap();
        assert_eq!(event, SendEvent::Sending { attempt: 0 });
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new(16);
        bus.publish(SendEvent::Confirming);
    }

    #[test]
    fn display_mentions_variant_name() {
        let event = SendEvent::Failed { error: SendError::new(ErrorCode::Unknown, "boom") };
        assert!(event.to_string().contains("Failed"));
    }
}
