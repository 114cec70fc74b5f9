//! Chain adapters
//!
//! One adapter per chain kind. Each adapter knows how to read new gateway
//! events since a cursor, broadcast a destination-chain transaction for a
//! relay envelope, and report confirmation. Adapters classify every
//! failure as transient or permanent; they never decide retry policy.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::ChainError;
use crate::relay::generic::{ConfirmationStatus, Cursor, PollOutcome, RelayEnvelope, TxReceipt};

pub mod cosmos;
pub mod evm;

pub use cosmos::CosmosAdapter;
pub use evm::EvmAdapter;

/// Interface between the relay loop and a concrete chain.
///
/// Implementations make network calls only; all relay state (cursor,
/// envelope status, attempts) lives with the relay loop.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Logical name of the chain this adapter serves.
    fn chain_name(&self) -> &str;

    /// Reads gateway events at or above the cursor height.
    ///
    /// Events are returned strictly ordered by `(block_height, log_index)`
    /// ascending, finite per call, restartable from any prior cursor. The
    /// outcome also reports the highest height fully scanned so the
    /// caller can advance its cursor across empty block ranges.
    ///
    /// # Errors
    ///
    /// * `ChainError::Transient` - transport or RPC failure, retryable
    /// * `ChainError::Permanent` - malformed event data, not retryable
    async fn poll_events(&self, since: &Cursor) -> Result<PollOutcome, ChainError>;

    /// Signs and broadcasts the destination-chain transaction for an
    /// envelope.
    ///
    /// Idempotent from the caller's perspective: resubmitting an envelope
    /// whose command id was already executed is detected and rejected with
    /// `ChainError::SubmissionConflict`, which the relay loop treats as
    /// success.
    async fn submit(&self, envelope: &RelayEnvelope) -> Result<TxReceipt, ChainError>;

    /// Waits until the destination chain reports inclusion of `tx_hash`
    /// or the timeout elapses.
    ///
    /// A timeout is reported as `ChainError::Transient` so the relay loop
    /// can retry; only an execution failure reported by the chain itself
    /// yields `ConfirmationStatus::Failed`.
    async fn await_confirmation(
        &self,
        tx_hash: &str,
        timeout: Duration,
    ) -> Result<ConfirmationStatus, ChainError>;
}
