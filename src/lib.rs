//! GMP Relay Service Library
//!
//! This crate provides the cross-chain message relay loop that forwards
//! General Message Passing calls and token transfers between an EVM chain
//! and a Cosmos chain through their gateway contracts. It polls both
//! ledgers, correlates outbound gateway events with their destination
//! chain, and drives idempotent destination-side execution with bounded
//! retry.

pub mod adapter;
pub mod api;
pub mod config;
pub mod error;
pub mod registry;
pub mod relay;

// Re-export commonly used types
pub use adapter::{ChainAdapter, CosmosAdapter, EvmAdapter};
pub use api::{ApiResponse, ApiServer};
pub use config::{ApiConfig, Config, CosmosChainConfig, EvmChainConfig, RelayConfig, TokenConfig};
pub use error::{ChainError, ErrorKind};
pub use registry::RelayerRegistry;
pub use relay::{
    command_id, correlate, ChainEvent, ConfirmationStatus, Cursor, EnvelopeStatus, EventKind,
    PollOutcome, RelayEnvelope, RelayLoop, RelayState, RelaySummary, TokenTransfer, TxReceipt,
};
