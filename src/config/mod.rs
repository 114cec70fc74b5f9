//! Configuration Management Module
//!
//! This module handles loading and managing configuration for the relay
//! service. Configuration includes chain endpoints, gateway addresses,
//! relay timing/retry parameters, the tracked token list, and API server
//! settings. Operator keys are loaded from environment variables at
//! runtime; the config file only names the variables.

use serde::{Deserialize, Serialize};

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

/// Main configuration structure containing all service settings.
///
/// This structure holds configuration for:
/// - The EVM chain connection and gateway contract
/// - The Cosmos chain connection and gateway contract
/// - Relay loop timing, confirmation, and retry parameters
/// - The tracked token allowlist
/// - API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// EVM chain configuration
    pub evm_chain: EvmChainConfig,
    /// Cosmos chain configuration
    pub cosmos_chain: CosmosChainConfig,
    /// Relay loop configuration (tracked chains, timing, retry)
    pub relay: RelayConfig,
    /// API server configuration (host, port, CORS settings)
    pub api: ApiConfig,
    /// Tokens the relay will forward; empty means no restriction
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
}

/// Configuration for an EVM-compatible chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvmChainConfig {
    /// Logical chain name used for routing (e.g. "ethereum")
    pub name: String,
    /// JSON-RPC endpoint URL
    pub rpc_url: String,
    /// Address of the gateway contract emitting cross-chain call events
    pub gateway_addr: String,
    /// Maximum block range scanned per poll (public RPCs cap this)
    #[serde(default = "default_event_block_range")]
    pub event_block_range: u64,
    /// Environment variable name containing the operator's hex ECDSA key
    #[serde(default = "default_evm_operator_key_env")]
    pub operator_key_env: String,
}

fn default_event_block_range() -> u64 {
    1000
}

fn default_evm_operator_key_env() -> String {
    "GMP_RELAY_EVM_OPERATOR_KEY".to_string()
}

impl EvmChainConfig {
    /// Loads the operator key from the environment variable.
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - The private key (hex encoded)
    /// * `Err(anyhow::Error)` - Failed to load from environment
    pub fn operator_key(&self) -> anyhow::Result<String> {
        std::env::var(&self.operator_key_env).map_err(|_| {
            anyhow::anyhow!(
                "Environment variable '{}' not set. Please set it with the relay operator's hex ECDSA private key.",
                self.operator_key_env
            )
        })
    }
}

/// Configuration for a Cosmos chain hosting the wasm gateway contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CosmosChainConfig {
    /// Logical chain name used for routing (e.g. "agoric")
    pub name: String,
    /// Tendermint RPC endpoint URL
    pub rpc_url: String,
    /// Bech32 address of the gateway contract
    pub gateway_addr: String,
    /// Bech32 address of the gateway-authorized relay operator account
    pub operator_addr: String,
}

/// Relay loop configuration.
///
/// `source_chains` is the explicit list of chains the loop polls; each
/// must have a handler registered before its first tick does useful work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Chains polled for outbound gateway events
    pub source_chains: Vec<String>,
    /// Sleep between ticks in milliseconds
    pub poll_interval_ms: u64,
    /// Timeout for destination-chain confirmation in milliseconds
    pub confirmation_timeout_ms: u64,
    /// Dispatch attempts per envelope before it fails terminally
    pub max_attempts: u32,
    /// Base retry delay in milliseconds, doubled per attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

/// A token the relay is allowed to forward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Symbol as emitted in gateway events (e.g. "aUSDC")
    pub symbol: String,
    /// ERC-20 contract address on the EVM chain
    pub evm_address: String,
    /// Bank denom on the Cosmos chain
    pub cosmos_denom: String,
}

/// API server configuration for external communication.
///
/// Controls how the relay service exposes its REST endpoints and handles
/// cross-origin requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Host address to bind the API server to
    pub host: String,
    /// Port number to bind the API server to
    pub port: u16,
    /// Allowed CORS origins for cross-origin requests
    pub cors_origins: Vec<String>,
}

// ============================================================================
// CONFIGURATION LOADING AND MANAGEMENT
// ============================================================================

impl Config {
    /// Validates the configuration.
    ///
    /// This function ensures that:
    /// - Chain names are unique and non-empty
    /// - Every tracked source chain names a configured chain
    /// - RPC URLs parse
    /// - Relay timing and retry parameters are usable
    /// - Token symbols are unique
    ///
    /// # Returns
    ///
    /// - `Ok(())` - Configuration is valid
    /// - `Err(anyhow::Error)` - First problem found
    pub fn validate(&self) -> anyhow::Result<()> {
        let evm_name = self.evm_chain.name.to_lowercase();
        let cosmos_name = self.cosmos_chain.name.to_lowercase();

        if evm_name.is_empty() || cosmos_name.is_empty() {
            return Err(anyhow::anyhow!(
                "Configuration error: chain names must not be empty"
            ));
        }

        if evm_name == cosmos_name {
            return Err(anyhow::anyhow!(
                "Configuration error: EVM chain and Cosmos chain share the name '{}'. Each chain must have a unique name.",
                evm_name
            ));
        }

        for rpc_url in [&self.evm_chain.rpc_url, &self.cosmos_chain.rpc_url] {
            url::Url::parse(rpc_url).map_err(|e| {
                anyhow::anyhow!(
                    "Configuration error: rpc_url '{}' is not a valid URL: {}",
                    rpc_url,
                    e
                )
            })?;
        }

        if self.relay.source_chains.is_empty() {
            return Err(anyhow::anyhow!(
                "Configuration error: relay.source_chains must list at least one chain"
            ));
        }

        for chain in &self.relay.source_chains {
            let lowered = chain.to_lowercase();
            if lowered != evm_name && lowered != cosmos_name {
                return Err(anyhow::anyhow!(
                    "Configuration error: tracked source chain '{}' is not a configured chain",
                    chain
                ));
            }
        }

        if self.relay.max_attempts == 0 {
            return Err(anyhow::anyhow!(
                "Configuration error: relay.max_attempts must be at least 1"
            ));
        }

        if self.relay.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!(
                "Configuration error: relay.poll_interval_ms must be positive"
            ));
        }

        let mut symbols = std::collections::HashSet::new();
        for token in &self.tokens {
            if !symbols.insert(token.symbol.to_lowercase()) {
                return Err(anyhow::anyhow!(
                    "Configuration error: duplicate token symbol '{}'",
                    token.symbol
                ));
            }
        }

        Ok(())
    }

    /// Loads configuration from the TOML file.
    ///
    /// This function:
    /// 1. Checks if config/gmp-relay.toml exists (or GMP_RELAY_CONFIG_PATH)
    /// 2. If it exists, loads and parses the configuration
    /// 3. Validates the configuration
    /// 4. If it doesn't exist, returns an error asking user to copy template
    ///
    /// # Returns
    ///
    /// - `Ok(Config)` - Successfully loaded and validated configuration
    /// - `Err(anyhow::Error)` - Failed to load, file doesn't exist, or validation failed
    pub fn load() -> anyhow::Result<Self> {
        // Check for custom config path via environment variable (for tests)
        let config_path = std::env::var("GMP_RELAY_CONFIG_PATH")
            .unwrap_or_else(|_| "config/gmp-relay.toml".to_string());

        if std::path::Path::new(&config_path).exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Err(anyhow::anyhow!(
                "Configuration file '{}' not found. Please copy the template:\n\
                cp config/gmp-relay.template.toml config/gmp-relay.toml\n\
                Then edit config/gmp-relay.toml with your actual values.",
                config_path
            ))
        }
    }
}
