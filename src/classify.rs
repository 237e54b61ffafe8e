//! Pure error classification: maps an opaque error message to a retry decision.

use crate::error::{ErrorCode, SendError};

/// The classifier's verdict: whether to retry, whether a resign is required
/// before the next attempt, and a coarse textual kind for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub retryable: bool,
    pub needs_resign: bool,
    pub kind: &'static str,
}

impl Classification {
    const fn new(retryable: bool, needs_resign: bool, kind: &'static str) -> Self {
        Self { retryable, needs_resign, kind }
    }
}

const NON_RETRYABLE_SUBSTRINGS: &[&str] = &[
    "insufficient funds",
    "invalid account data",
    "account not found",
    "signature verification failed",
    "transaction simulation failed at instruction",
    "program failed to complete",
    "already been processed",
];

const BLOCKHASH_EXPIRED_SUBSTRINGS: &[&str] = &[
    "blockhash not found",
    "block height exceeded",
    "transactionexpiredblockheightexceeded",
];

const NETWORK_ERROR_CODES: &[&str] =
    &["econnreset", "etimedout", "enotfound", "econnrefused", "eai_again", "epipe"];

const RATE_LIMIT_SUBSTRINGS: &[&str] = &["429", "too many requests"];
const SERVICE_UNAVAILABLE_SUBSTRINGS: &[&str] = &["503", "service unavailable"];

const OTHER_RETRYABLE_SUBSTRINGS: &[&str] = &["node is behind", "node unhealthy", "unhealthy"];
const RESIGN_SUBSTRINGS: &[&str] = &["needs resign", "stale blockhash"];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Classify an error by its code and rendered message, applying the
/// precedence order: non-retryable substrings, then typed blockhash
/// expiry, then network error codes, then HTTP status patterns, then
/// other retryable substrings, defaulting to non-retryable/unknown.
///
/// Walks the whole `cause()` chain rather than just the top-level error:
/// `ConnectionPool::with_fallback` and the retry loop both wrap the
/// original RPC failure in a generic coded error (`AllEndpointsUnhealthy`,
/// `RetriesExhausted`), and `thiserror`'s `#[error(...)]` display doesn't
/// include the cause, so the retryable signal usually lives one or more
/// levels down.
pub fn classify(err: &SendError) -> Classification {
    let mut haystacks = Vec::new();
    let mut typed_blockhash_expired = false;
    let mut current = Some(err);
    while let Some(e) = current {
        if e.code() == ErrorCode::BlockhashExpired {
            typed_blockhash_expired = true;
        }
        haystacks.push(e.message().to_lowercase());
        haystacks.push(e.to_string().to_lowercase());
        current = e.cause();
    }
    let any_contains = |needles: &[&str]| haystacks.iter().any(|h| contains_any(h, needles));

    if any_contains(NON_RETRYABLE_SUBSTRINGS) {
        return Classification::new(false, false, "NON_RETRYABLE");
    }

    if typed_blockhash_expired || any_contains(BLOCKHASH_EXPIRED_SUBSTRINGS) {
        return Classification::new(true, true, "BLOCKHASH_EXPIRED");
    }

    if any_contains(NETWORK_ERROR_CODES) {
        return Classification::new(true, false, "NETWORK_ERROR");
    }

    if any_contains(RATE_LIMIT_SUBSTRINGS) {
        return Classification::new(true, false, "RATE_LIMITED");
    }
    if any_contains(SERVICE_UNAVAILABLE_SUBSTRINGS) {
        return Classification::new(true, false, "SERVICE_UNAVAILABLE");
    }

    if any_contains(OTHER_RETRYABLE_SUBSTRINGS) {
        let needs_resign = any_contains(RESIGN_SUBSTRINGS);
        return Classification::new(true, needs_resign, "RETRYABLE_OTHER");
    }

    Classification::new(false, false, "UNKNOWN")
}
