//! Cosmos chain adapter
//!
//! Polls a CosmWasm gateway contract for `wasm-contract_call` events over
//! Tendermint JSON-RPC (`status` + `tx_search`) and broadcasts execute
//! envelopes with `broadcast_tx_sync`. Event attributes arrive base64
//! encoded from Tendermint 0.34 nodes and plain from newer ones; both are
//! accepted.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::adapter::ChainAdapter;
use crate::config::CosmosChainConfig;
use crate::error::ChainError;
use crate::relay::generic::{
    hex_to_bytes, normalize_address, ChainEvent, ConfirmationStatus, Cursor, EventKind,
    PollOutcome, RelayEnvelope, TokenTransfer, TxReceipt,
};

/// Gateway event types emitted by the wasm contract.
const CONTRACT_CALL_EVENT: &str = "wasm-contract_call";
const CONTRACT_CALL_WITH_TOKEN_EVENT: &str = "wasm-contract_call_with_token";
const MESSAGE_EXECUTED_EVENT: &str = "wasm-message_executed";

/// Transactions fetched per `tx_search` page.
const TX_SEARCH_PAGE_SIZE: usize = 100;

/// Poll spacing while waiting for a transaction to be indexed.
const TX_POLL_INTERVAL: Duration = Duration::from_millis(500);

// ============================================================================
// JSON-RPC TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct RpcRequest {
    jsonrpc: String,
    method: String,
    params: serde_json::Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    message: String,
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResult {
    sync_info: SyncInfo,
}

#[derive(Debug, Deserialize)]
struct SyncInfo {
    latest_block_height: String,
}

#[derive(Debug, Deserialize)]
struct TxSearchResult {
    txs: Vec<TxInfo>,
    total_count: String,
}

#[derive(Debug, Deserialize)]
struct TxInfo {
    hash: String,
    height: String,
    tx_result: TxResult,
}

#[derive(Debug, Deserialize)]
struct TxResult {
    #[serde(default)]
    code: u32,
    #[serde(default)]
    events: Vec<AbciEvent>,
}

#[derive(Debug, Deserialize)]
struct AbciEvent {
    #[serde(rename = "type")]
    kind: String,
    attributes: Vec<AbciAttribute>,
}

#[derive(Debug, Deserialize)]
struct AbciAttribute {
    key: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct TxLookupResult {
    tx_result: TxResult,
    height: String,
}

#[derive(Debug, Deserialize)]
struct BroadcastResult {
    code: u32,
    hash: String,
    #[serde(default)]
    log: String,
}

/// Execute envelope broadcast to the gateway contract.
///
/// Local gateway nodes accept JSON-encoded envelopes; the operator address
/// must be a gateway-authorized relayer account.
#[derive(Debug, Serialize)]
struct ExecuteEnvelope<'a> {
    contract: &'a str,
    sender: &'a str,
    msg: ExecuteMsg<'a>,
}

#[derive(Debug, Serialize)]
struct ExecuteMsg<'a> {
    execute_from_remote: ExecutePayload<'a>,
}

#[derive(Debug, Serialize)]
struct ExecutePayload<'a> {
    command_id: &'a str,
    source_chain: &'a str,
    source_address: &'a str,
    payload: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    token_symbol: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    token_amount: Option<String>,
}

// ============================================================================
// ATTRIBUTE DECODING
// ============================================================================

/// Decodes an event attribute that may be base64 (Tendermint 0.34) or
/// plain text (0.35+).
fn decode_attribute(raw: &str) -> String {
    match general_purpose::STANDARD.decode(raw) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(_) => raw.to_string(),
        },
        Err(_) => raw.to_string(),
    }
}

fn attributes_to_map(event: &AbciEvent) -> HashMap<String, String> {
    event
        .attributes
        .iter()
        .map(|attr| (decode_attribute(&attr.key), decode_attribute(&attr.value)))
        .collect()
}

fn required_attr(
    attrs: &HashMap<String, String>,
    key: &str,
    event_kind: &str,
) -> Result<String, ChainError> {
    attrs.get(key).cloned().ok_or_else(|| {
        ChainError::Permanent(format!("{} event missing attribute {}", event_kind, key))
    })
}

// ============================================================================
// COSMOS ADAPTER
// ============================================================================

/// Adapter for a Cosmos chain hosting the wasm gateway contract.
pub struct CosmosAdapter {
    name: String,
    rpc_url: String,
    gateway_addr: String,
    operator_addr: String,
    client: reqwest::Client,
    executed: RwLock<HashSet<String>>,
    submitted: RwLock<HashMap<String, String>>,
}

impl CosmosAdapter {
    pub fn new(config: &CosmosChainConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .no_proxy()
            .build()?;

        Ok(Self {
            name: config.name.to_lowercase(),
            rpc_url: config.rpc_url.clone(),
            gateway_addr: config.gateway_addr.clone(),
            operator_addr: config.operator_addr.clone(),
            client,
            executed: RwLock::new(HashSet::new()),
            submitted: RwLock::new(HashMap::new()),
        })
    }

    async fn rpc_call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, ChainError> {
        let request = RpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: 1,
        };

        let response: RpcResponse<T> = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChainError::Transient(format!("{} request failed: {}", method, e)))?
            .json()
            .await
            .map_err(|e| ChainError::Transient(format!("{} response unreadable: {}", method, e)))?;

        if let Some(error) = response.error {
            let detail = error.data.unwrap_or_default();
            return Err(ChainError::Transient(format!(
                "{} rpc error: {} {}",
                method, error.message, detail
            )));
        }

        response
            .result
            .ok_or_else(|| ChainError::Transient(format!("{} returned no result", method)))
    }

    fn parse_height(value: &str) -> Result<u64, ChainError> {
        value
            .parse::<u64>()
            .map_err(|_| ChainError::Permanent(format!("malformed block height: {}", value)))
    }

    /// Converts one wasm gateway event into a `ChainEvent`.
    fn parse_event(
        &self,
        tx: &TxInfo,
        event_index: u64,
        event: &AbciEvent,
    ) -> Result<ChainEvent, ChainError> {
        let kind = match event.kind.as_str() {
            CONTRACT_CALL_EVENT => EventKind::ContractCall,
            CONTRACT_CALL_WITH_TOKEN_EVENT => EventKind::ContractCallWithToken,
            other => {
                return Err(ChainError::Permanent(format!(
                    "unexpected gateway event type {}",
                    other
                )))
            }
        };

        let attrs = attributes_to_map(event);
        let payload = required_attr(&attrs, "payload", &event.kind)?;
        hex_to_bytes(&payload)
            .map_err(|e| ChainError::Permanent(format!("malformed payload attribute: {}", e)))?;

        let token = if kind == EventKind::ContractCallWithToken {
            let amount_raw = required_attr(&attrs, "amount", &event.kind)?;
            let amount = amount_raw.parse::<u128>().map_err(|_| {
                ChainError::Permanent(format!("malformed token amount: {}", amount_raw))
            })?;
            Some(TokenTransfer {
                symbol: required_attr(&attrs, "symbol", &event.kind)?,
                amount,
            })
        } else {
            None
        };

        Ok(ChainEvent {
            source_chain: self.name.clone(),
            source_address: required_attr(&attrs, "sender", &event.kind)?,
            tx_hash: normalize_address(&tx.hash),
            block_height: Self::parse_height(&tx.height)?,
            log_index: event_index,
            kind,
            payload: normalize_address(&payload),
            destination_chain: required_attr(&attrs, "destination_chain", &event.kind)?
                .to_lowercase(),
            destination_address: required_attr(&attrs, "destination_address", &event.kind)?,
            token,
        })
    }

    async fn tx_search(&self, query: &str, page: usize) -> Result<TxSearchResult, ChainError> {
        self.rpc_call(
            "tx_search",
            serde_json::json!({
                "query": query,
                "prove": false,
                "page": page.to_string(),
                "per_page": TX_SEARCH_PAGE_SIZE.to_string(),
                "order_by": "asc",
            }),
        )
        .await
    }

    /// Checks whether the gateway already executed a command id.
    async fn is_command_executed(&self, command_id: &str) -> Result<bool, ChainError> {
        if self.executed.read().await.contains(command_id) {
            return Ok(true);
        }

        let query = format!(
            "{}.command_id='{}' AND {}._contract_address='{}'",
            MESSAGE_EXECUTED_EVENT, command_id, MESSAGE_EXECUTED_EVENT, self.gateway_addr
        );
        let result = self.tx_search(&query, 1).await?;
        let total: u64 = result.total_count.parse().unwrap_or(0);
        Ok(total > 0)
    }
}

#[async_trait]
impl ChainAdapter for CosmosAdapter {
    fn chain_name(&self) -> &str {
        &self.name
    }

    async fn poll_events(&self, since: &Cursor) -> Result<PollOutcome, ChainError> {
        let status: StatusResult = self.rpc_call("status", serde_json::json!({})).await?;
        let head = Self::parse_height(&status.sync_info.latest_block_height)?;

        if head < since.height {
            return Ok(PollOutcome::empty_below(since.height));
        }

        let query = format!(
            "tx.height>={} AND tx.height<={} AND {}._contract_address='{}'",
            since.height, head, CONTRACT_CALL_EVENT, self.gateway_addr
        );

        let mut events = Vec::new();
        let mut page = 1;
        let mut fetched = 0usize;
        loop {
            let result = self.tx_search(&query, page).await?;
            let total: usize = result.total_count.parse().unwrap_or(0);
            fetched += result.txs.len();

            for tx in &result.txs {
                // Only successfully executed transactions emit real events
                if tx.tx_result.code != 0 {
                    continue;
                }
                for (index, event) in tx.tx_result.events.iter().enumerate() {
                    if event.kind != CONTRACT_CALL_EVENT
                        && event.kind != CONTRACT_CALL_WITH_TOKEN_EVENT
                    {
                        continue;
                    }
                    events.push(self.parse_event(tx, index as u64, event)?);
                }
            }

            if fetched >= total || result.txs.is_empty() {
                break;
            }
            page += 1;
        }

        events.sort_by_key(|e| (e.block_height, e.log_index));
        debug!(
            "Polled {} gateway events from {} heights [{}, {}]",
            events.len(),
            self.name,
            since.height,
            head
        );
        Ok(PollOutcome {
            events,
            scanned_to: head,
        })
    }

    async fn submit(&self, envelope: &RelayEnvelope) -> Result<TxReceipt, ChainError> {
        if self.is_command_executed(&envelope.command_id).await? {
            return Err(ChainError::SubmissionConflict(envelope.command_id.clone()));
        }

        let token_amount = envelope
            .event
            .token
            .as_ref()
            .map(|token| token.amount.to_string());
        let execute = ExecuteEnvelope {
            contract: &self.gateway_addr,
            sender: &self.operator_addr,
            msg: ExecuteMsg {
                execute_from_remote: ExecutePayload {
                    command_id: &envelope.command_id,
                    source_chain: &envelope.event.source_chain,
                    source_address: &envelope.event.source_address,
                    payload: &envelope.event.payload,
                    token_symbol: envelope
                        .event
                        .token
                        .as_ref()
                        .map(|token| token.symbol.as_str()),
                    token_amount,
                },
            },
        };

        let tx_bytes = serde_json::to_vec(&execute)
            .map_err(|e| ChainError::Permanent(format!("execute envelope unserializable: {}", e)))?;

        let result: BroadcastResult = self
            .rpc_call(
                "broadcast_tx_sync",
                serde_json::json!({ "tx": general_purpose::STANDARD.encode(&tx_bytes) }),
            )
            .await?;

        if result.code != 0 {
            return Err(ChainError::Transient(format!(
                "broadcast rejected with code {}: {}",
                result.code, result.log
            )));
        }

        let tx_hash = normalize_address(&result.hash);
        self.submitted
            .write()
            .await
            .insert(tx_hash.clone(), envelope.command_id.clone());

        info!(
            "Submitted command {} to {} as tx {}",
            envelope.command_id, self.name, tx_hash
        );

        Ok(TxReceipt {
            tx_hash,
            block_height: None,
        })
    }

    async fn await_confirmation(
        &self,
        tx_hash: &str,
        timeout: Duration,
    ) -> Result<ConfirmationStatus, ChainError> {
        let hash_bytes = hex_to_bytes(tx_hash)
            .map_err(|e| ChainError::Permanent(format!("malformed tx hash: {}", e)))?;
        let hash_b64 = general_purpose::STANDARD.encode(&hash_bytes);
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let lookup: Result<TxLookupResult, ChainError> = self
                .rpc_call(
                    "tx",
                    serde_json::json!({ "hash": hash_b64, "prove": false }),
                )
                .await;

            match lookup {
                Ok(result) => {
                    return if result.tx_result.code == 0 {
                        if let Some(command_id) = self.submitted.write().await.remove(tx_hash) {
                            self.executed.write().await.insert(command_id);
                        }
                        Ok(ConfirmationStatus::Confirmed)
                    } else {
                        warn!(
                            "Transaction {} failed on {} at height {} (code {})",
                            tx_hash, self.name, result.height, result.tx_result.code
                        );
                        Ok(ConfirmationStatus::Failed)
                    };
                }
                // Not indexed yet; keep polling until the deadline
                Err(_) if tokio::time::Instant::now() < deadline => {
                    tokio::time::sleep(TX_POLL_INTERVAL).await;
                }
                Err(_) => {
                    return Err(ChainError::Transient(format!(
                        "confirmation of {} timed out after {:?}",
                        tx_hash, timeout
                    )));
                }
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_base64_attributes() {
        // "destination_chain" / "ethereum" as a 0.34 node would emit them
        assert_eq!(decode_attribute("ZGVzdGluYXRpb25fY2hhaW4="), "destination_chain");
        assert_eq!(decode_attribute("ZXRoZXJldW0="), "ethereum");
    }

    #[test]
    fn passes_plain_attributes_through() {
        assert_eq!(decode_attribute("destination_chain"), "destination_chain");
        assert_eq!(decode_attribute("agoric1gateway"), "agoric1gateway");
    }

    #[test]
    fn missing_attribute_is_permanent() {
        let attrs = HashMap::new();
        let err = required_attr(&attrs, "payload", CONTRACT_CALL_EVENT).unwrap_err();
        assert!(matches!(err, ChainError::Permanent(_)));
    }

    #[test]
    fn malformed_height_is_permanent() {
        let err = CosmosAdapter::parse_height("not-a-height").unwrap_err();
        assert!(matches!(err, ChainError::Permanent(_)));
    }
}
