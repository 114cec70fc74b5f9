//! Relayer registry mapping chain names to their adapter handlers
//!
//! The registry is injected into the relay loop at construction instead of
//! living in a process-wide global, while keeping the late-binding "set"
//! semantics: registering a handler for an already-registered chain
//! overwrites the previous one and takes effect on the next tick.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::adapter::ChainAdapter;

/// Table of chain name -> adapter registrations.
///
/// Lookups are case-insensitive over the chain name, matching how gateway
/// events spell destination chains ("Ethereum" routes to "ethereum").
/// Read-mostly: ticks only take the read lock, registration is rare.
#[derive(Clone, Default)]
pub struct RelayerRegistry {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn ChainAdapter>>>>,
}

impl RelayerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for a chain, overwriting any previous one.
    ///
    /// # Arguments
    ///
    /// * `chain` - Logical chain name (e.g. "ethereum", "agoric")
    /// * `handler` - Adapter that polls and submits for that chain
    pub async fn set_relayer(&self, chain: &str, handler: Arc<dyn ChainAdapter>) {
        let key = chain.to_lowercase();
        let mut handlers = self.handlers.write().await;
        if handlers.insert(key, handler).is_some() {
            info!("Replaced relayer registration for chain {}", chain);
        } else {
            info!("Registered relayer for chain {}", chain);
        }
    }

    /// Looks up the handler registered for a chain.
    ///
    /// # Returns
    ///
    /// * `Some(handler)` - A handler is registered for this chain
    /// * `None` - No registration; the caller surfaces this as an
    ///   unroutable destination
    pub async fn get_relayer(&self, chain: &str) -> Option<Arc<dyn ChainAdapter>> {
        let handlers = self.handlers.read().await;
        handlers.get(&chain.to_lowercase()).cloned()
    }

    /// Returns the names of all registered chains, sorted.
    pub async fn registered_chains(&self) -> Vec<String> {
        let handlers = self.handlers.read().await;
        let mut chains: Vec<String> = handlers.keys().cloned().collect();
        chains.sort();
        chains
    }
}
