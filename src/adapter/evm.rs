//! EVM chain adapter
//!
//! Polls an EVM gateway contract for `ContractCall` and
//! `ContractCallWithToken` events over JSON-RPC and executes approved
//! commands on destination contracts. Event topics and function selectors
//! are derived at runtime from the canonical signatures, so the adapter
//! carries no hand-written hash constants.

use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::adapter::ChainAdapter;
use crate::config::EvmChainConfig;
use crate::error::ChainError;
use crate::relay::generic::{
    hex_to_bytes, normalize_address, ChainEvent, ConfirmationStatus, Cursor, EventKind,
    PollOutcome, RelayEnvelope, TokenTransfer, TxReceipt,
};

/// Canonical gateway event signatures.
const CONTRACT_CALL_SIG: &str = "ContractCall(address,string,string,bytes32,bytes)";
const CONTRACT_CALL_WITH_TOKEN_SIG: &str =
    "ContractCallWithToken(address,string,string,bytes32,bytes,string,uint256)";

/// Destination-side execution entry points.
const EXECUTE_SIG: &str = "execute(bytes32,string,string,bytes)";
const EXECUTE_WITH_TOKEN_SIG: &str = "executeWithToken(bytes32,string,string,bytes,string,uint256)";
const IS_COMMAND_EXECUTED_SIG: &str = "isCommandExecuted(bytes32)";

/// Gas limit attached to destination executions.
const EXECUTE_GAS: &str = "0x7a1200";

/// Poll spacing while waiting for a transaction receipt.
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(500);

// ============================================================================
// JSON-RPC TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: serde_json::Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct LogEntry {
    address: String,
    topics: Vec<String>,
    data: String,
    #[serde(rename = "blockNumber")]
    block_number: String,
    #[serde(rename = "transactionHash")]
    transaction_hash: String,
    #[serde(rename = "logIndex")]
    log_index: String,
}

#[derive(Debug, Deserialize)]
struct ReceiptEntry {
    status: Option<String>,
    #[serde(rename = "blockNumber")]
    block_number: Option<String>,
}

// ============================================================================
// KECCAK HELPERS
// ============================================================================

fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Topic hash for an event signature, 0x-prefixed hex.
pub fn event_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(keccak256(signature.as_bytes())))
}

/// First four bytes of the Keccak-256 of a function signature.
pub fn function_selector(signature: &str) -> [u8; 4] {
    let digest = keccak256(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Derives the 0x-prefixed operator address from a hex ECDSA private key.
pub fn operator_address_from_key(key_hex: &str) -> anyhow::Result<String> {
    let key_bytes = hex_to_bytes(key_hex)?;
    let signing_key = SigningKey::from_slice(&key_bytes)
        .map_err(|e| anyhow::anyhow!("invalid ECDSA operator key: {}", e))?;
    let point = signing_key.verifying_key().to_encoded_point(false);
    // Uncompressed SEC1 point: 0x04 || X || Y; the address is the last 20
    // bytes of keccak(X || Y).
    let digest = keccak256(&point.as_bytes()[1..]);
    Ok(format!("0x{}", hex::encode(&digest[12..])))
}

// ============================================================================
// ABI ENCODING / DECODING
// ============================================================================

/// Argument value for ABI call encoding.
pub enum AbiToken {
    Bytes32([u8; 32]),
    Uint(u128),
    String(String),
    Bytes(Vec<u8>),
}

impl AbiToken {
    fn is_dynamic(&self) -> bool {
        matches!(self, AbiToken::String(_) | AbiToken::Bytes(_))
    }

    fn tail_bytes(&self) -> Vec<u8> {
        let data = match self {
            AbiToken::String(s) => s.as_bytes(),
            AbiToken::Bytes(b) => b.as_slice(),
            _ => return Vec::new(),
        };
        let mut out = encode_uint_word(data.len() as u128).to_vec();
        out.extend_from_slice(data);
        let padding = (32 - data.len() % 32) % 32;
        out.extend(std::iter::repeat(0u8).take(padding));
        out
    }
}

fn encode_uint_word(value: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

/// ABI-encodes a token list as call arguments (head words then tails).
pub fn encode_tokens(tokens: &[AbiToken]) -> Vec<u8> {
    let head_len = tokens.len() * 32;
    let mut head: Vec<u8> = Vec::with_capacity(head_len);
    let mut tail: Vec<u8> = Vec::new();

    for token in tokens {
        if token.is_dynamic() {
            head.extend_from_slice(&encode_uint_word((head_len + tail.len()) as u128));
            tail.extend_from_slice(&token.tail_bytes());
        } else {
            match token {
                AbiToken::Bytes32(value) => head.extend_from_slice(value),
                AbiToken::Uint(value) => head.extend_from_slice(&encode_uint_word(*value)),
                _ => unreachable!(),
            }
        }
    }

    head.extend_from_slice(&tail);
    head
}

/// ABI-encodes a full call: selector followed by encoded arguments.
pub fn encode_call(signature: &str, tokens: &[AbiToken]) -> String {
    let mut out = function_selector(signature).to_vec();
    out.extend_from_slice(&encode_tokens(tokens));
    format!("0x{}", hex::encode(out))
}

fn abi_word(data: &[u8], index: usize) -> Result<&[u8], ChainError> {
    let start = index * 32;
    data.get(start..start + 32)
        .ok_or_else(|| ChainError::Permanent(format!("abi data truncated at word {}", index)))
}

fn abi_word_as_usize(data: &[u8], index: usize) -> Result<usize, ChainError> {
    let word = abi_word(data, index)?;
    if word[..24].iter().any(|b| *b != 0) {
        return Err(ChainError::Permanent(format!(
            "abi word {} out of usize range",
            index
        )));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&word[24..]);
    Ok(u64::from_be_bytes(buf) as usize)
}

/// Reads a `uint256` head word as u128 (amounts above 2^128 are rejected).
pub fn read_uint(data: &[u8], word_index: usize) -> Result<u128, ChainError> {
    let word = abi_word(data, word_index)?;
    if word[..16].iter().any(|b| *b != 0) {
        return Err(ChainError::Permanent(
            "uint256 amount exceeds u128 range".to_string(),
        ));
    }
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(buf))
}

/// Reads a dynamic `bytes` field through its head-word offset.
pub fn read_bytes(data: &[u8], word_index: usize) -> Result<Vec<u8>, ChainError> {
    let offset = abi_word_as_usize(data, word_index)?;
    if offset % 32 != 0 {
        return Err(ChainError::Permanent(format!(
            "abi offset {} not word aligned",
            offset
        )));
    }
    let length = abi_word_as_usize(data, offset / 32)?;
    data.get(offset + 32..offset + 32 + length)
        .map(|slice| slice.to_vec())
        .ok_or_else(|| ChainError::Permanent("abi dynamic field truncated".to_string()))
}

/// Reads a dynamic `string` field through its head-word offset.
pub fn read_string(data: &[u8], word_index: usize) -> Result<String, ChainError> {
    let bytes = read_bytes(data, word_index)?;
    String::from_utf8(bytes)
        .map_err(|_| ChainError::Permanent("abi string field not valid utf-8".to_string()))
}

fn parse_hex_quantity(value: &str) -> Result<u64, ChainError> {
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    u64::from_str_radix(stripped, 16)
        .map_err(|_| ChainError::Permanent(format!("malformed hex quantity: {}", value)))
}

// ============================================================================
// EVM ADAPTER
// ============================================================================

/// Adapter for an EVM-compatible chain.
pub struct EvmAdapter {
    name: String,
    rpc_url: String,
    gateway_addr: String,
    operator_address: String,
    event_block_range: u64,
    client: reqwest::Client,
    contract_call_topic: String,
    contract_call_with_token_topic: String,
    /// Command ids confirmed on this chain, for duplicate short-circuit
    executed: RwLock<HashSet<String>>,
    /// In-flight tx hash -> command id, promoted to `executed` on confirm
    submitted: RwLock<HashMap<String, String>>,
}

impl EvmAdapter {
    /// Creates an adapter, loading the operator key from the environment
    /// variable named in the configuration.
    pub fn new(config: &EvmChainConfig) -> anyhow::Result<Self> {
        let key = config.operator_key()?;
        Self::with_operator_key(config, &key)
    }

    /// Creates an adapter with an explicit operator key.
    pub fn with_operator_key(config: &EvmChainConfig, key_hex: &str) -> anyhow::Result<Self> {
        let operator_address = operator_address_from_key(key_hex)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .no_proxy()
            .build()?;

        Ok(Self {
            name: config.name.to_lowercase(),
            rpc_url: config.rpc_url.clone(),
            gateway_addr: config.gateway_addr.to_lowercase(),
            operator_address,
            event_block_range: config.event_block_range,
            client,
            contract_call_topic: event_topic(CONTRACT_CALL_SIG),
            contract_call_with_token_topic: event_topic(CONTRACT_CALL_WITH_TOKEN_SIG),
            executed: RwLock::new(HashSet::new()),
            submitted: RwLock::new(HashMap::new()),
        })
    }

    /// Address transactions are sent from.
    pub fn operator_address(&self) -> &str {
        &self.operator_address
    }

    async fn rpc_call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<Option<T>, ChainError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: 1,
        };

        let response: JsonRpcResponse<T> = self
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
            return Err(ChainError::Transient(format!(
                "{} rpc error: {}",
                method, error.message
            )));
        }

        Ok(response.result)
    }

    async fn rpc_call_required<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, ChainError> {
        self.rpc_call(method, params)
            .await?
            .ok_or_else(|| ChainError::Transient(format!("{} returned no result", method)))
    }

    /// Converts one gateway log into a `ChainEvent`.
    fn parse_log(&self, log: &LogEntry) -> Result<ChainEvent, ChainError> {
        let topic0 = log
            .topics
            .first()
            .ok_or_else(|| ChainError::Permanent("log entry without topics".to_string()))?
            .to_lowercase();

        let kind = if topic0 == self.contract_call_topic {
            EventKind::ContractCall
        } else if topic0 == self.contract_call_with_token_topic {
            EventKind::ContractCallWithToken
        } else {
            return Err(ChainError::Permanent(format!(
                "unexpected gateway event topic {}",
                topic0
            )));
        };

        // topics[1] is the indexed sender, left-padded to 32 bytes
        let sender_topic = log
            .topics
            .get(1)
            .ok_or_else(|| ChainError::Permanent("gateway event missing sender topic".to_string()))?;
        let sender_bytes = hex_to_bytes(sender_topic)
            .map_err(|e| ChainError::Permanent(format!("malformed sender topic: {}", e)))?;
        if sender_bytes.len() != 32 {
            return Err(ChainError::Permanent(
                "sender topic is not 32 bytes".to_string(),
            ));
        }
        let source_address = format!("0x{}", hex::encode(&sender_bytes[12..]));

        let data = hex_to_bytes(&log.data)
            .map_err(|e| ChainError::Permanent(format!("malformed log data: {}", e)))?;

        let destination_chain = read_string(&data, 0)?;
        let destination_address = read_string(&data, 1)?;
        let payload = read_bytes(&data, 2)?;

        let token = if kind == EventKind::ContractCallWithToken {
            Some(TokenTransfer {
                symbol: read_string(&data, 3)?,
                amount: read_uint(&data, 4)?,
            })
        } else {
            None
        };

        Ok(ChainEvent {
            source_chain: self.name.clone(),
            source_address,
            tx_hash: normalize_address(&log.transaction_hash),
            block_height: parse_hex_quantity(&log.block_number)?,
            log_index: parse_hex_quantity(&log.log_index)?,
            kind,
            payload: format!("0x{}", hex::encode(&payload)),
            destination_chain: destination_chain.to_lowercase(),
            destination_address,
            token,
        })
    }

    /// Checks the gateway's executed-command registry for a command id.
    async fn is_command_executed(&self, command_id: &str) -> Result<bool, ChainError> {
        if self.executed.read().await.contains(command_id) {
            return Ok(true);
        }

        let command_bytes = hex_to_bytes(command_id)
            .map_err(|e| ChainError::Permanent(format!("malformed command id: {}", e)))?;
        let mut word = [0u8; 32];
        if command_bytes.len() != 32 {
            return Err(ChainError::Permanent(
                "command id is not 32 bytes".to_string(),
            ));
        }
        word.copy_from_slice(&command_bytes);

        let data = encode_call(IS_COMMAND_EXECUTED_SIG, &[AbiToken::Bytes32(word)]);
        let result: String = self
            .rpc_call_required(
                "eth_call",
                serde_json::json!([{ "to": self.gateway_addr, "data": data }, "latest"]),
            )
            .await?;

        let result_bytes = hex_to_bytes(&result)
            .map_err(|e| ChainError::Permanent(format!("malformed eth_call result: {}", e)))?;
        Ok(result_bytes.last().copied().unwrap_or(0) == 1)
    }

    fn execute_calldata(&self, envelope: &RelayEnvelope) -> Result<String, ChainError> {
        let command_bytes = hex_to_bytes(&envelope.command_id)
            .map_err(|e| ChainError::Permanent(format!("malformed command id: {}", e)))?;
        let mut command_word = [0u8; 32];
        if command_bytes.len() != 32 {
            return Err(ChainError::Permanent(
                "command id is not 32 bytes".to_string(),
            ));
        }
        command_word.copy_from_slice(&command_bytes);

        let payload = hex_to_bytes(&envelope.event.payload)
            .map_err(|e| ChainError::Permanent(format!("malformed payload: {}", e)))?;

        let calldata = match &envelope.event.token {
            None => encode_call(
                EXECUTE_SIG,
                &[
                    AbiToken::Bytes32(command_word),
                    AbiToken::String(envelope.event.source_chain.clone()),
                    AbiToken::String(envelope.event.source_address.clone()),
                    AbiToken::Bytes(payload),
                ],
            ),
            Some(token) => encode_call(
                EXECUTE_WITH_TOKEN_SIG,
                &[
                    AbiToken::Bytes32(command_word),
                    AbiToken::String(envelope.event.source_chain.clone()),
                    AbiToken::String(envelope.event.source_address.clone()),
                    AbiToken::Bytes(payload),
                    AbiToken::String(token.symbol.clone()),
                    AbiToken::Uint(token.amount),
                ],
            ),
        };

        Ok(calldata)
    }
}

#[async_trait]
impl ChainAdapter for EvmAdapter {
    fn chain_name(&self) -> &str {
        &self.name
    }

    async fn poll_events(&self, since: &Cursor) -> Result<PollOutcome, ChainError> {
        let head_hex: String = self
            .rpc_call_required("eth_blockNumber", serde_json::json!([]))
            .await?;
        let head = parse_hex_quantity(&head_hex)?;

        if head < since.height {
            return Ok(PollOutcome::empty_below(since.height));
        }

        // Bounded window; public RPCs reject unbounded ranges.
        let to_block = head.min(since.height.saturating_add(self.event_block_range));
        let params = serde_json::json!([{
            "address": self.gateway_addr,
            "fromBlock": format!("0x{:x}", since.height),
            "toBlock": format!("0x{:x}", to_block),
            "topics": [[self.contract_call_topic, self.contract_call_with_token_topic]],
        }]);

        let logs: Vec<LogEntry> = self
            .rpc_call("eth_getLogs", params)
            .await?
            .unwrap_or_default();

        let mut events = Vec::with_capacity(logs.len());
        for log in &logs {
            if log.address.to_lowercase() != self.gateway_addr {
                continue;
            }
            events.push(self.parse_log(log)?);
        }

        events.sort_by_key(|e| (e.block_height, e.log_index));
        debug!(
            "Polled {} gateway events from {} blocks [{}, {}]",
            events.len(),
            self.name,
            since.height,
            to_block
        );
        Ok(PollOutcome {
            events,
            scanned_to: to_block,
        })
    }

    async fn submit(&self, envelope: &RelayEnvelope) -> Result<TxReceipt, ChainError> {
        if self.is_command_executed(&envelope.command_id).await? {
            return Err(ChainError::SubmissionConflict(envelope.command_id.clone()));
        }

        let calldata = self.execute_calldata(envelope)?;
        let params = serde_json::json!([{
            "from": self.operator_address,
            "to": envelope.event.destination_address,
            "data": calldata,
            "gas": EXECUTE_GAS,
        }]);

        let tx_hash: String = self.rpc_call_required("eth_sendTransaction", params).await?;
        let tx_hash = normalize_address(&tx_hash);

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
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let receipt: Option<ReceiptEntry> = self
                .rpc_call("eth_getTransactionReceipt", serde_json::json!([tx_hash]))
                .await?;

            if let Some(receipt) = receipt {
                let status = receipt.status.as_deref().unwrap_or("0x0");
                return if status == "0x1" {
                    if let Some(command_id) = self.submitted.write().await.remove(tx_hash) {
                        self.executed.write().await.insert(command_id);
                    }
                    Ok(ConfirmationStatus::Confirmed)
                } else {
                    warn!(
                        "Transaction {} reverted on {} (block {:?})",
                        tx_hash, self.name, receipt.block_number
                    );
                    Ok(ConfirmationStatus::Failed)
                };
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(ChainError::Transient(format!(
                    "confirmation of {} timed out after {:?}",
                    tx_hash, timeout
                )));
            }

            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
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
    fn selector_is_first_four_digest_bytes() {
        let digest = keccak256(EXECUTE_SIG.as_bytes());
        assert_eq!(function_selector(EXECUTE_SIG), digest[..4]);
    }

    #[test]
    fn event_topics_are_distinct() {
        assert_ne!(
            event_topic(CONTRACT_CALL_SIG),
            event_topic(CONTRACT_CALL_WITH_TOKEN_SIG)
        );
        assert_eq!(event_topic(CONTRACT_CALL_SIG).len(), 66);
    }

    #[test]
    fn operator_address_from_known_key() {
        // Canonical vector: private key 1 owns this address.
        let address = operator_address_from_key(
            "0x0000000000000000000000000000000000000000000000000000000000000001",
        )
        .unwrap();
        assert_eq!(address, "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf");
    }

    #[test]
    fn encode_decode_round_trip() {
        let encoded = encode_tokens(&[
            AbiToken::String("agoric".to_string()),
            AbiToken::String("agoric1contract".to_string()),
            AbiToken::Bytes(vec![0xde, 0xad, 0xbe, 0xef]),
            AbiToken::String("aUSDC".to_string()),
            AbiToken::Uint(100),
        ]);

        assert_eq!(read_string(&encoded, 0).unwrap(), "agoric");
        assert_eq!(read_string(&encoded, 1).unwrap(), "agoric1contract");
        assert_eq!(read_bytes(&encoded, 2).unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(read_string(&encoded, 3).unwrap(), "aUSDC");
        assert_eq!(read_uint(&encoded, 4).unwrap(), 100);
    }

    #[test]
    fn encode_pads_dynamic_fields_to_word_boundary() {
        let encoded = encode_tokens(&[AbiToken::Bytes(vec![1, 2, 3])]);
        // head word + length word + one padded data word
        assert_eq!(encoded.len(), 96);
        assert_eq!(encoded[95], 0, "padding should be zero bytes");
    }

    #[test]
    fn truncated_abi_data_is_permanent() {
        let err = read_string(&[0u8; 16], 0).unwrap_err();
        assert!(matches!(err, ChainError::Permanent(_)));
    }

    #[test]
    fn oversized_uint_is_permanent() {
        let mut data = [0u8; 32];
        data[0] = 1;
        let err = read_uint(&data, 0).unwrap_err();
        assert!(matches!(err, ChainError::Permanent(_)));
    }

    #[test]
    fn hex_quantity_parsing() {
        assert_eq!(parse_hex_quantity("0x10").unwrap(), 16);
        assert!(parse_hex_quantity("0xzz").is_err());
    }
}
