//! Event correlation
//!
//! Builds the cross-chain envelope for an observed event by resolving its
//! destination chain against the relayer registry. Stateless: routing
//! policy lives here, dispatch policy lives in the relay loop.

use crate::error::ErrorKind;
use crate::registry::RelayerRegistry;
use crate::relay::generic::{ChainEvent, RelayEnvelope};

/// Correlates an observed event with its destination-chain execution.
///
/// Looks up the event's destination chain in the registry. An event whose
/// destination has no registered handler yields an immediately-Failed
/// envelope with `UnroutableDestination` so it is surfaced rather than
/// silently dropped; no submission is ever attempted for it.
///
/// # Arguments
///
/// * `registry` - Registry of chain handlers
/// * `event` - The observed source chain event
///
/// # Returns
///
/// * Pending envelope when the destination is routable
/// * Failed envelope with `UnroutableDestination` otherwise
pub async fn correlate(registry: &RelayerRegistry, event: ChainEvent) -> RelayEnvelope {
    match registry.get_relayer(&event.destination_chain).await {
        Some(_) => RelayEnvelope::new(event),
        None => RelayEnvelope::failed(event, ErrorKind::UnroutableDestination),
    }
}
