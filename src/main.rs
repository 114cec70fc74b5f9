//! GMP Relay Service
//!
//! A relay service that forwards cross-chain contract calls and token
//! transfers between an EVM chain and a Cosmos chain through their
//! gateway contracts.
//!
//! ## Overview
//!
//! The relay:
//! 1. Polls each tracked source chain's gateway for outbound call events
//! 2. Correlates every event with its destination chain handler
//! 3. Executes the call on the destination chain with a deterministic
//!    command id, so duplicate submissions are absorbed
//! 4. Retries transient failures with backoff and surfaces terminal
//!    failures through logs and the REST API
//!
//! ## Security Requirements
//!
//! **CRITICAL**: This service holds operator wallet keys and can execute
//! arbitrary relayed messages. Ensure proper key management and access
//! controls for production use.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

mod adapter;
mod api;
mod config;
mod error;
mod registry;
mod relay;

use adapter::{CosmosAdapter, EvmAdapter};
use config::Config;
use registry::RelayerRegistry;
use relay::RelayLoop;

// ============================================================================
// MAIN APPLICATION ENTRY POINT
// ============================================================================

/// Main application entry point that initializes and runs the relay.
///
/// This function:
/// 1. Initializes logging and tracing
/// 2. Loads configuration from TOML file
/// 3. Builds and registers the chain adapters
/// 4. Starts the API server and the relay loop
/// 5. Runs until a shutdown signal arrives, then lets the in-flight tick
///    finish before exiting
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured logging for debugging and monitoring
    tracing_subscriber::fmt::init();

    info!("Starting GMP Relay Service");

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();

    // Check for help flag
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        println!("GMP Relay Service");
        println!();
        println!("Usage: gmp-relay [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --testnet, -t     Use testnet configuration (config/gmp-relay_testnet.toml)");
        println!("  --config <path>   Use custom config file path (overrides --testnet)");
        println!("  --help, -h        Show this help message");
        println!();
        println!("Environment variables:");
        println!("  GMP_RELAY_CONFIG_PATH    Path to config file (overrides --config and --testnet)");
        return Ok(());
    }

    // Check for custom config path
    let mut config_path = None;
    for (i, arg) in args.iter().enumerate() {
        if arg == "--config" && i + 1 < args.len() {
            config_path = Some(args[i + 1].clone());
            break;
        }
    }

    // Set config path based on flags
    if let Some(path) = config_path {
        std::env::set_var("GMP_RELAY_CONFIG_PATH", &path);
        info!("Using custom config: {}", path);
    } else if args.iter().any(|arg| arg == "--testnet" || arg == "-t") {
        std::env::set_var("GMP_RELAY_CONFIG_PATH", "config/gmp-relay_testnet.toml");
        info!("Using testnet configuration");
    }

    // Load configuration from config/gmp-relay.toml (or GMP_RELAY_CONFIG_PATH)
    let config = Config::load()?;
    info!("Configuration loaded successfully");

    // Build chain adapters and register them; late registrations through
    // the same registry take effect on the next tick
    let registry = RelayerRegistry::new();
    let evm_adapter = Arc::new(EvmAdapter::new(&config.evm_chain)?);
    registry
        .set_relayer(&config.evm_chain.name, evm_adapter)
        .await;
    let cosmos_adapter = Arc::new(CosmosAdapter::new(&config.cosmos_chain)?);
    registry
        .set_relayer(&config.cosmos_chain.name, cosmos_adapter)
        .await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let relay = Arc::new(RelayLoop::new(
        registry.clone(),
        config.relay.clone(),
        &config.tokens,
        shutdown_rx,
    ));

    info!("Relay loop initialized successfully");

    // Start the REST API server over the relay's shared state
    let api_server = api::ApiServer::new(config.clone(), relay.state(), registry.clone());
    tokio::spawn(async move {
        if let Err(e) = api_server.run().await {
            eprintln!("API server error: {}", e);
        }
    });

    // Run the relay in the background and wait for a shutdown signal
    let relay_task = tokio::spawn(Arc::clone(&relay).run());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, finishing in-flight work");
    let _ = shutdown_tx.send(true);

    relay_task.await??;

    Ok(())
}
