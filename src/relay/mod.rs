//! Relay core
//!
//! Shared event/envelope/cursor structures, the event correlator, and the
//! relay loop driver.

pub mod correlate;
pub mod driver;
pub mod generic;

pub use correlate::correlate;
pub use driver::{RelayLoop, RelayState, RelaySummary};
pub use generic::{
    command_id, ChainEvent, ConfirmationStatus, Cursor, EnvelopeStatus, EventKind, PollOutcome,
    RelayEnvelope, TokenTransfer, TxReceipt,
};
