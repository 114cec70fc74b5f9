//! Generic relay structures shared across chain kinds
//!
//! This module contains the cross-chain event and envelope structures plus
//! the cursor type used by the relay loop. Both the EVM and Cosmos
//! adapters produce `ChainEvent`s in this shape; the relay loop wraps them
//! in `RelayEnvelope`s and drives them to completion.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::error::ErrorKind;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Derives the deterministic command id for an observed event.
///
/// The id is the Keccak-256 hash of `"<tx_hash>:<log_index>"`, hex encoded
/// with a 0x prefix. Destination chains use it for duplicate detection, so
/// the same source event always maps to the same command id across
/// restarts and resubmissions.
///
/// # Arguments
///
/// * `tx_hash` - Source chain transaction hash (0x-prefixed hex)
/// * `log_index` - Index of the event within the transaction's log set
///
/// # Returns
///
/// * 0x-prefixed, 64-hex-character command id
pub fn command_id(tx_hash: &str, log_index: u64) -> String {
    let mut hasher = Keccak256::new();
    hasher.update(format!("{}:{}", normalize_address(tx_hash), log_index).as_bytes());
    format!("0x{}", hex::encode(hasher.finalize()))
}

/// Normalizes a hex value to have a 0x prefix and lowercase digits.
pub fn normalize_address(value: &str) -> String {
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    format!("0x{}", stripped.to_lowercase())
}

/// Converts a hex string (with or without 0x prefix) to bytes.
pub fn hex_to_bytes(hex_str: &str) -> anyhow::Result<Vec<u8>> {
    let hex_clean = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    Ok(hex::decode(hex_clean)?)
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Current unix time in milliseconds.
pub fn unix_now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ============================================================================
// EVENT DATA STRUCTURES
// ============================================================================

/// Kind of gateway event observed on a source chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// Plain cross-chain contract call with a payload
    ContractCall,
    /// Contract call carrying a token transfer alongside the payload
    ContractCallWithToken,
}

/// Token transfer attached to a `ContractCallWithToken` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTransfer {
    /// Token symbol as emitted by the source gateway (e.g. "aUSDC")
    pub symbol: String,
    /// Transfer amount in the token's smallest unit
    pub amount: u128,
}

/// A gateway event observed on a source chain. Immutable once observed.
///
/// Adapters return these strictly ordered by `(block_height, log_index)`
/// so that the relay loop can dispatch in observation order and advance
/// its cursor without gaps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEvent {
    /// Name of the chain the event was observed on
    pub source_chain: String,
    /// Address of the contract that initiated the cross-chain call
    pub source_address: String,
    /// Transaction hash the event was emitted in (0x-prefixed hex)
    pub tx_hash: String,
    /// Block height (EVM) or tx height (Cosmos) of the transaction
    pub block_height: u64,
    /// Index of the event within the transaction's log set
    pub log_index: u64,
    /// Gateway event kind
    pub kind: EventKind,
    /// Call payload, 0x-prefixed hex
    pub payload: String,
    /// Name of the chain the call is addressed to
    pub destination_chain: String,
    /// Contract address on the destination chain
    pub destination_address: String,
    /// Token transfer, present only for `ContractCallWithToken`
    pub token: Option<TokenTransfer>,
}

impl ChainEvent {
    /// Deterministic command id for this event.
    pub fn command_id(&self) -> String {
        command_id(&self.tx_hash, self.log_index)
    }
}

/// Result of one `ChainAdapter::poll_events` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollOutcome {
    /// Events observed, strictly ordered by `(block_height, log_index)`
    pub events: Vec<ChainEvent>,
    /// Highest block height fully scanned (inclusive); the cursor may
    /// advance to `scanned_to + 1` once every event is dispatched
    pub scanned_to: u64,
}

impl PollOutcome {
    /// Outcome of a poll that found the chain head below the cursor.
    pub fn empty_below(cursor_height: u64) -> Self {
        Self {
            events: Vec::new(),
            scanned_to: cursor_height.saturating_sub(1),
        }
    }
}

/// Receipt returned by `ChainAdapter::submit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxReceipt {
    /// Destination chain transaction hash
    pub tx_hash: String,
    /// Block height the transaction landed in, when already known
    pub block_height: Option<u64>,
}

/// Outcome reported by `ChainAdapter::await_confirmation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationStatus {
    /// The destination chain included and executed the transaction
    Confirmed,
    /// The destination chain included the transaction but execution failed
    Failed,
}

// ============================================================================
// RELAY ENVELOPE
// ============================================================================

/// Submission state of a relay envelope.
///
/// Transitions are monotonic: `Pending -> Submitted -> Confirmed`, or any
/// non-terminal state `-> Failed`. The relay loop is the only component
/// that mutates status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeStatus {
    /// Observed and correlated, not yet accepted by the destination chain
    Pending,
    /// Broadcast to the destination chain, awaiting confirmation
    Submitted,
    /// Included and executed on the destination chain. Terminal.
    Confirmed,
    /// Terminally failed past the retry ceiling or on a permanent error
    Failed,
}

impl EnvelopeStatus {
    /// Position in the monotonic transition order.
    fn rank(self) -> u8 {
        match self {
            EnvelopeStatus::Pending => 0,
            EnvelopeStatus::Submitted => 1,
            EnvelopeStatus::Confirmed => 2,
            EnvelopeStatus::Failed => 3,
        }
    }

    /// Whether an event in this state may be passed by the source cursor.
    ///
    /// Submitted and terminal envelopes no longer need the cursor to hold
    /// their height; a restart re-observing them is absorbed by the
    /// destination-side idempotency check.
    pub fn releases_cursor(self) -> bool {
        self != EnvelopeStatus::Pending
    }
}

/// Correlates one observed event with its destination-chain execution.
///
/// Created when an event is first observed, mutated only by the relay loop
/// as submission progresses, and dropped once Confirmed or retained in the
/// failed list once terminally Failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayEnvelope {
    /// The observed source chain event
    pub event: ChainEvent,
    /// Deterministic message id derived from `(tx_hash, log_index)`
    pub command_id: String,
    /// Submission state, advanced monotonically by the relay loop
    pub status: EnvelopeStatus,
    /// Number of dispatch attempts made so far; only ever increases
    pub attempts: u32,
    /// Classification of the most recent failure, if any
    pub last_error: Option<ErrorKind>,
    /// Unix seconds when the event was first observed
    pub first_seen: u64,
    /// Unix milliseconds before which the envelope must not be
    /// redispatched (retry backoff gate)
    pub not_before: u64,
}

impl RelayEnvelope {
    /// Creates a pending envelope for a freshly observed event.
    pub fn new(event: ChainEvent) -> Self {
        let command_id = event.command_id();
        Self {
            event,
            command_id,
            status: EnvelopeStatus::Pending,
            attempts: 0,
            last_error: None,
            first_seen: unix_now(),
            not_before: 0,
        }
    }

    /// Creates an envelope that failed correlation before any dispatch.
    pub fn failed(event: ChainEvent, error: ErrorKind) -> Self {
        let mut envelope = Self::new(event);
        envelope.status = EnvelopeStatus::Failed;
        envelope.last_error = Some(error);
        envelope
    }

    /// Creates a synthetic Failed envelope surfacing a dead poll
    /// direction.
    ///
    /// Emitted when a source chain's `poll_events` fails past the retry
    /// ceiling, so that polling failures reach the same observable failed
    /// list as dispatch failures. No submit is ever attempted for these.
    pub fn poll_failure(chain: &str, height: u64, attempts: u32, error: ErrorKind) -> Self {
        let event = ChainEvent {
            source_chain: chain.to_string(),
            source_address: String::new(),
            tx_hash: "0x0".to_string(),
            block_height: height,
            log_index: 0,
            kind: EventKind::ContractCall,
            payload: "0x".to_string(),
            destination_chain: chain.to_string(),
            destination_address: String::new(),
            token: None,
        };
        Self {
            event,
            command_id: format!("poll:{}:{}", chain, height),
            status: EnvelopeStatus::Failed,
            attempts,
            last_error: Some(error),
            first_seen: unix_now(),
            not_before: 0,
        }
    }

    /// Advances the status, ignoring regressions.
    ///
    /// Status transitions are monotonic; a late confirmation arriving for
    /// an envelope already marked Failed does not resurrect it.
    pub fn advance_status(&mut self, next: EnvelopeStatus) {
        if next.rank() > self.status.rank() {
            self.status = next;
        }
    }

    /// Whether the envelope is due for another dispatch attempt.
    ///
    /// Pending envelopes retry their submission; Submitted envelopes whose
    /// confirmation timed out are redispatched and rely on the
    /// destination-side idempotency check to absorb the duplicate.
    ///
    /// # Arguments
    ///
    /// * `now_ms` - Current unix time in milliseconds
    pub fn is_due(&self, now_ms: u64) -> bool {
        matches!(
            self.status,
            EnvelopeStatus::Pending | EnvelopeStatus::Submitted
        ) && now_ms >= self.not_before
    }
}

// ============================================================================
// CURSOR
// ============================================================================

/// Per-source-chain watermark of the next block height to scan.
///
/// Owned by the relay task driving that chain. Advanced only after every
/// event up to the new height reached at least `Submitted`, so a restart
/// never skips work; duplicate submission after a restart is absorbed by
/// the destination-side idempotency check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Chain this cursor tracks
    pub chain: String,
    /// Next block height to scan; everything below is settled
    pub height: u64,
}

impl Cursor {
    /// Creates a cursor starting at the given height.
    pub fn new(chain: impl Into<String>, height: u64) -> Self {
        Self {
            chain: chain.into(),
            height,
        }
    }

    /// Advances to `height`, ignoring regressions.
    ///
    /// # Returns
    ///
    /// * `true` if the cursor moved forward
    pub fn advance_to(&mut self, height: u64) -> bool {
        if height > self.height {
            self.height = height;
            true
        } else {
            false
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
