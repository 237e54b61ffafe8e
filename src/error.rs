//! Coded error taxonomy for the send pipeline and its subsystems.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// The closed set of machine-readable failure codes the pipeline can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    RetriesExhausted,
    NonRetryable,
    BlockhashExpired,
    BlockhashFetchFailed,
    SimulationFailed,
    InsufficientFunds,
    ConfirmationTimeout,
    TransactionFailed,
    AllEndpointsUnhealthy,
    RateLimited,
    ServiceUnavailable,
    BundleFailed,
    BundleDropped,
    TipTooLow,
    FeeEstimationFailed,
    Unknown,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RetriesExhausted => "RetriesExhausted",
            Self::NonRetryable => "NonRetryable",
            Self::BlockhashExpired => "BlockhashExpired",
            Self::BlockhashFetchFailed => "BlockhashFetchFailed",
            Self::SimulationFailed => "SimulationFailed",
            Self::InsufficientFunds => "InsufficientFunds",
            Self::ConfirmationTimeout => "ConfirmationTimeout",
            Self::TransactionFailed => "TransactionFailed",
            Self::AllEndpointsUnhealthy => "AllEndpointsUnhealthy",
            Self::RateLimited => "RateLimited",
            Self::ServiceUnavailable => "ServiceUnavailable",
            Self::BundleFailed => "BundleFailed",
            Self::BundleDropped => "BundleDropped",
            Self::TipTooLow => "TipTooLow",
            Self::FeeEstimationFailed => "FeeEstimationFailed",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Free-form diagnostic context attached to a [`SendError`] (e.g. simulation logs).
pub type ErrorContext = BTreeMap<String, String>;

/// A coded, chainable error raised anywhere in the pipeline.
#[derive(Debug, Clone, thiserror::Error)]
#[error("[{code}] {message}")]
pub struct SendError {
    code: ErrorCode,
    message: String,
    #[source]
    cause: Option<Arc<SendError>>,
    context: ErrorContext,
}

impl SendError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), cause: None, context: ErrorContext::new() }
    }

    #[must_use]
    pub fn with_cause(mut self, cause: SendError) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    pub fn cause(&self) -> Option<&SendError> {
        self.cause.as_deref()
    }

    /// Construct a generic, uncoded error wrapping an opaque upstream failure,
    /// for use at RPC boundaries before classification assigns a real code.
    pub fn opaque(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unknown, message)
    }
}

pub type SendResult<T> = Result<T, SendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code_and_message() {
        let err = SendError::new(ErrorCode::RetriesExhausted, "gave up after 4 attempts");
        let rendered = err.to_string();
        assert!(rendered.contains("RetriesExhausted"));
        assert!(rendered.contains("gave up after 4 attempts"));
    }

    #[test]
    fn source_chain_is_preserved() {
        let cause = SendError::new(ErrorCode::BlockhashFetchFailed, "timed out");
        let err = SendError::new(ErrorCode::BlockhashExpired, "stale").with_cause(cause);
        let src = std::error::Error::source(&err).expect("cause present");
        assert!(src.to_string().contains("timed out"));
    }

    #[test]
    fn context_roundtrips() {
        let err = SendError::new(ErrorCode::SimulationFailed, "sim failed")
            .with_context("logs", "Program log: fail");
        assert_eq!(err.context().get("logs").map(String::as_str), Some("Program log: fail"));
    }

    #[test]
    fn code_accessor() {
        let err = SendError::new(ErrorCode::InsufficientFunds, "not enough lamports");
        assert_eq!(err.code(), ErrorCode::InsufficientFunds);
    }
}
