//! Shared test helpers
//!
//! This module provides helper functions used by the integration tests.
//!
//! The module is organized into three categories:
//! - **Constants**: Dummy addresses, hashes, and chain names
//! - **Configuration Builders**: Functions to create test configurations
//! - **Mock Adapter**: A scripted `ChainAdapter` used to drive the relay
//!   loop without any network

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gmp_relay::adapter::ChainAdapter;
use gmp_relay::config::{
    ApiConfig, Config, CosmosChainConfig, EvmChainConfig, RelayConfig, TokenConfig,
};
use gmp_relay::error::ChainError;
use gmp_relay::relay::generic::{
    ChainEvent, ConfirmationStatus, Cursor, EventKind, PollOutcome, RelayEnvelope, TokenTransfer,
    TxReceipt,
};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Source chain name used by most tests
pub const TEST_EVM_CHAIN: &str = "ethereum";

/// Destination chain name used by most tests
pub const TEST_COSMOS_CHAIN: &str = "agoric";

/// Dummy transaction hash (64 hex characters)
#[allow(dead_code)]
pub const DUMMY_TX_HASH: &str =
    "0x0000000000000000000000000000000000000000000000000000000000000012";

/// Dummy gateway contract address (EVM format, 20 bytes)
#[allow(dead_code)]
pub const DUMMY_GATEWAY_ADDR_EVM: &str = "0x0000000000000000000000000000000000000010";

/// Dummy sender contract address (EVM format, 20 bytes)
#[allow(dead_code)]
pub const DUMMY_SENDER_ADDR_EVM: &str = "0x00000000000000000000000000000000000000aa";

/// Dummy destination contract address on the Cosmos chain
#[allow(dead_code)]
pub const DUMMY_DEST_ADDR_COSMOS: &str = "agoric1contract";

/// Well-known private key 1; owns 0x7e5f...5bdf
#[allow(dead_code)]
pub const DUMMY_OPERATOR_KEY: &str =
    "0x0000000000000000000000000000000000000000000000000000000000000001";

// ============================================================================
// CONFIGURATION BUILDERS
// ============================================================================

/// Builds a full service configuration suitable for tests.
#[allow(dead_code)]
pub fn build_test_config() -> Config {
    Config {
        evm_chain: build_test_evm_chain_config("http://127.0.0.1:8545"),
        cosmos_chain: build_test_cosmos_chain_config("http://127.0.0.1:26657"),
        relay: build_test_relay_config(3),
        api: ApiConfig {
            host: "127.0.0.1".to_string(),
            port: 3333,
            cors_origins: vec!["*".to_string()],
        },
        tokens: vec![TokenConfig {
            symbol: "aUSDC".to_string(),
            evm_address: "0x000000000000000000000000000000000000000e".to_string(),
            cosmos_denom: "uausdc".to_string(),
        }],
    }
}

/// Builds an EVM chain configuration pointing at the given RPC URL.
#[allow(dead_code)]
pub fn build_test_evm_chain_config(rpc_url: &str) -> EvmChainConfig {
    EvmChainConfig {
        name: TEST_EVM_CHAIN.to_string(),
        rpc_url: rpc_url.to_string(),
        gateway_addr: DUMMY_GATEWAY_ADDR_EVM.to_string(),
        event_block_range: 1000,
        operator_key_env: "GMP_RELAY_EVM_OPERATOR_KEY".to_string(),
    }
}

/// Builds a Cosmos chain configuration pointing at the given RPC URL.
#[allow(dead_code)]
pub fn build_test_cosmos_chain_config(rpc_url: &str) -> CosmosChainConfig {
    CosmosChainConfig {
        name: TEST_COSMOS_CHAIN.to_string(),
        rpc_url: rpc_url.to_string(),
        gateway_addr: "agoric1gateway".to_string(),
        operator_addr: "agoric1operator".to_string(),
    }
}

/// Builds relay settings with fast timing so tests stay bounded.
///
/// The 1ms retry base makes backed-off envelopes due again by the next
/// relay pass.
#[allow(dead_code)]
pub fn build_test_relay_config(max_attempts: u32) -> RelayConfig {
    RelayConfig {
        source_chains: vec![TEST_EVM_CHAIN.to_string()],
        poll_interval_ms: 10,
        confirmation_timeout_ms: 100,
        max_attempts,
        retry_backoff_ms: 1,
    }
}

// ============================================================================
// EVENT BUILDERS
// ============================================================================

/// Builds a `ContractCall` event from the EVM chain to the Cosmos chain.
#[allow(dead_code)]
pub fn build_contract_call_event(block_height: u64, log_index: u64) -> ChainEvent {
    ChainEvent {
        source_chain: TEST_EVM_CHAIN.to_string(),
        source_address: DUMMY_SENDER_ADDR_EVM.to_string(),
        tx_hash: DUMMY_TX_HASH.to_string(),
        block_height,
        log_index,
        kind: EventKind::ContractCall,
        payload: "0xdeadbeef".to_string(),
        destination_chain: TEST_COSMOS_CHAIN.to_string(),
        destination_address: DUMMY_DEST_ADDR_COSMOS.to_string(),
        token: None,
    }
}

/// Builds a `ContractCallWithToken` event carrying the given amount.
#[allow(dead_code)]
pub fn build_token_event(block_height: u64, log_index: u64, symbol: &str, amount: u128) -> ChainEvent {
    let mut event = build_contract_call_event(block_height, log_index);
    event.kind = EventKind::ContractCallWithToken;
    event.token = Some(TokenTransfer {
        symbol: symbol.to_string(),
        amount,
    });
    event
}

/// Wraps events in a poll outcome scanned through the given height.
#[allow(dead_code)]
pub fn poll_outcome(events: Vec<ChainEvent>, scanned_to: u64) -> PollOutcome {
    PollOutcome { events, scanned_to }
}

// ============================================================================
// MOCK ADAPTER
// ============================================================================

#[derive(Default)]
struct MockState {
    poll_script: VecDeque<Result<PollOutcome, ChainError>>,
    submit_script: VecDeque<Result<(), ChainError>>,
    confirm_script: VecDeque<Result<ConfirmationStatus, ChainError>>,
    /// All submit calls, including idempotent short-circuits
    submit_calls: usize,
    /// Envelopes actually broadcast (past the idempotency check)
    broadcasts: Vec<RelayEnvelope>,
    /// Command ids confirmed on this chain
    executed: HashSet<String>,
    pending_confirm: HashMap<String, String>,
    /// Destination-side executions (confirmed transactions)
    executions: usize,
    tx_counter: u64,
}

/// Scripted in-memory chain adapter.
///
/// Poll, submit, and confirmation outcomes are queued ahead of time; when
/// a script runs dry the adapter answers with an empty poll, a successful
/// broadcast, and a confirmed transaction. The idempotency contract is
/// modeled the way the real adapters do it: confirmed command ids are
/// remembered and resubmission short-circuits with a conflict.
pub struct MockAdapter {
    name: String,
    state: Mutex<MockState>,
}

#[allow(dead_code)]
impl MockAdapter {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            state: Mutex::new(MockState::default()),
        })
    }

    /// Queues one poll result.
    pub fn script_poll(&self, result: Result<PollOutcome, ChainError>) {
        self.state.lock().unwrap().poll_script.push_back(result);
    }

    /// Queues one submit failure; a queued `Ok` broadcasts normally.
    pub fn script_submit(&self, result: Result<(), ChainError>) {
        self.state.lock().unwrap().submit_script.push_back(result);
    }

    /// Queues one confirmation result.
    pub fn script_confirm(&self, result: Result<ConfirmationStatus, ChainError>) {
        self.state.lock().unwrap().confirm_script.push_back(result);
    }

    /// Marks a command id as already executed on this chain.
    pub fn mark_executed(&self, command_id: &str) {
        self.state
            .lock()
            .unwrap()
            .executed
            .insert(command_id.to_string());
    }

    /// Number of submit calls, including idempotent short-circuits.
    pub fn submit_calls(&self) -> usize {
        self.state.lock().unwrap().submit_calls
    }

    /// Envelopes actually broadcast, in call order.
    pub fn broadcasts(&self) -> Vec<RelayEnvelope> {
        self.state.lock().unwrap().broadcasts.clone()
    }

    /// Number of confirmed destination-side executions.
    pub fn executions(&self) -> usize {
        self.state.lock().unwrap().executions
    }
}

#[async_trait]
impl ChainAdapter for MockAdapter {
    fn chain_name(&self) -> &str {
        &self.name
    }

    async fn poll_events(&self, since: &Cursor) -> Result<PollOutcome, ChainError> {
        let mut state = self.state.lock().unwrap();
        match state.poll_script.pop_front() {
            Some(result) => result,
            None => Ok(PollOutcome::empty_below(since.height)),
        }
    }

    async fn submit(&self, envelope: &RelayEnvelope) -> Result<TxReceipt, ChainError> {
        let mut state = self.state.lock().unwrap();
        state.submit_calls += 1;

        if state.executed.contains(&envelope.command_id) {
            return Err(ChainError::SubmissionConflict(envelope.command_id.clone()));
        }

        if let Some(result) = state.submit_script.pop_front() {
            result?;
        }

        state.broadcasts.push(envelope.clone());
        state.tx_counter += 1;
        let tx_hash = format!("0x{:064x}", state.tx_counter);
        state
            .pending_confirm
            .insert(tx_hash.clone(), envelope.command_id.clone());

        Ok(TxReceipt {
            tx_hash,
            block_height: None,
        })
    }

    async fn await_confirmation(
        &self,
        tx_hash: &str,
        _timeout: Duration,
    ) -> Result<ConfirmationStatus, ChainError> {
        let mut state = self.state.lock().unwrap();
        let result = state
            .confirm_script
            .pop_front()
            .unwrap_or(Ok(ConfirmationStatus::Confirmed));

        if let Ok(ConfirmationStatus::Confirmed) = result {
            if let Some(command_id) = state.pending_confirm.remove(tx_hash) {
                state.executed.insert(command_id);
                state.executions += 1;
            }
        }

        result
    }
}
