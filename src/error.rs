//! Error taxonomy for chain interaction and relay dispatch
//!
//! Adapters classify every failure as transient (retryable) or permanent
//! (never retried); the relay loop is the only component that decides
//! between retry and terminal failure based on that classification.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure raised by a chain adapter while polling, submitting, or
/// confirming.
///
/// The classification is part of the adapter contract: transport and
/// timeout problems are `Transient` and safe to retry, while malformed
/// chain data is `Permanent` and must never be retried.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Network, timeout, or RPC availability failure. Retryable.
    #[error("transient chain error: {0}")]
    Transient(String),

    /// Malformed or unsupported chain data. Not retryable.
    #[error("permanent chain error: {0}")]
    Permanent(String),

    /// The destination chain already executed this command id.
    ///
    /// Raised by `submit` when the idempotency check detects a duplicate.
    /// Treated as success by the relay loop, never surfaced as a failure.
    #[error("command {0} already executed on destination chain")]
    SubmissionConflict(String),
}

impl ChainError {
    /// Returns the envelope-level error kind this failure maps to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChainError::Transient(_) => ErrorKind::Transient,
            ChainError::Permanent(_) => ErrorKind::Permanent,
            ChainError::SubmissionConflict(_) => ErrorKind::SubmissionConflict,
        }
    }

    /// Whether the relay loop may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChainError::Transient(_))
    }
}

/// Classification recorded on a relay envelope after a failed operation.
///
/// `SubmissionConflict` never appears on a `Failed` envelope: the relay
/// loop records it and immediately marks the envelope `Confirmed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Network/timeout failure, retried with backoff up to the ceiling.
    Transient,
    /// Malformed or unsupported event, surfaced and never retried.
    Permanent,
    /// No handler registered for the event's destination chain.
    UnroutableDestination,
    /// Idempotency check detected a duplicate; success-equivalent.
    SubmissionConflict,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::UnroutableDestination => "unroutable destination",
            ErrorKind::SubmissionConflict => "submission conflict",
        };
        write!(f, "{}", label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_retryable() {
        assert!(ChainError::Transient("connection reset".to_string()).is_retryable());
        assert!(!ChainError::Permanent("bad abi data".to_string()).is_retryable());
        assert!(!ChainError::SubmissionConflict("0xabc".to_string()).is_retryable());
    }

    #[test]
    fn kind_mapping_matches_variant() {
        assert_eq!(
            ChainError::Transient("timeout".to_string()).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            ChainError::Permanent("truncated log".to_string()).kind(),
            ErrorKind::Permanent
        );
        assert_eq!(
            ChainError::SubmissionConflict("0xabc".to_string()).kind(),
            ErrorKind::SubmissionConflict
        );
    }
}
