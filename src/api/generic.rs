//! Generic API structures and handlers
//!
//! Read-only HTTP surface over the relay loop's shared state: health,
//! cursors, registered chains, and the pending/failed envelope lists.
//! Failed envelopes are the operator-alert surface; nothing here mutates
//! relay state.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use warp::{
    http::{Method, StatusCode},
    Filter, Rejection, Reply,
};

use crate::config::Config;
use crate::registry::RelayerRegistry;
use crate::relay::driver::RelayState;
use crate::relay::generic::{Cursor, RelayEnvelope};

// ============================================================================
// SHARED REQUEST/RESPONSE STRUCTURES
// ============================================================================

/// Standardized response structure for all API endpoints.
///
/// This structure provides a consistent response format for all API
/// endpoints, including success/error status and relevant data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the request was successful
    pub success: bool,
    /// Response data (if successful)
    pub data: Option<T>,
    /// Error message (if failed)
    pub error: Option<String>,
}

/// Relay status snapshot returned by the status endpoint.
#[derive(Debug, Serialize)]
struct RelayStatus {
    /// Chains with a registered handler
    registered_chains: Vec<String>,
    /// Per-chain cursors
    cursors: Vec<Cursor>,
    /// Envelopes waiting for a retry
    pending_count: usize,
    /// Terminally failed envelopes
    failed_count: usize,
}

// ============================================================================
// GENERIC API HANDLERS
// ============================================================================

/// Handler for the status endpoint.
///
/// Returns the registered chains, every tracked cursor, and the sizes of
/// the pending and failed envelope lists.
async fn get_status_handler(
    state: Arc<RelayState>,
    registry: RelayerRegistry,
) -> Result<impl warp::Reply, warp::Rejection> {
    let status = RelayStatus {
        registered_chains: registry.registered_chains().await,
        cursors: state.cursors().await,
        pending_count: state.pending_envelopes().await.len(),
        failed_count: state.failed_envelopes().await.len(),
    };

    Ok(warp::reply::json(&ApiResponse {
        success: true,
        data: Some(status),
        error: None,
    }))
}

/// Handler for the failed envelopes endpoint.
///
/// Returns every terminally failed envelope for operator inspection.
async fn get_failed_handler(
    state: Arc<RelayState>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let failed: Vec<RelayEnvelope> = state.failed_envelopes().await;

    Ok(warp::reply::json(&ApiResponse {
        success: true,
        data: Some(failed),
        error: None,
    }))
}

/// Handler for the pending envelopes endpoint.
///
/// Returns every envelope currently waiting in a retry queue.
async fn get_pending_handler(
    state: Arc<RelayState>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let pending: Vec<RelayEnvelope> = state.pending_envelopes().await;

    Ok(warp::reply::json(&ApiResponse {
        success: true,
        data: Some(pending),
        error: None,
    }))
}

// ============================================================================
// WARP FILTER HELPERS
// ============================================================================

/// Creates a warp filter that injects the relay state into handlers.
fn with_state(
    state: Arc<RelayState>,
) -> impl Filter<Extract = (Arc<RelayState>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// Creates a warp filter that injects the registry into handlers.
fn with_registry(
    registry: RelayerRegistry,
) -> impl Filter<Extract = (RelayerRegistry,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || registry.clone())
}

// ============================================================================
// CORS CONFIGURATION
// ============================================================================

/// Creates a CORS filter based on the configured allowed origins.
fn create_cors_filter(allowed_origins: &[String]) -> warp::cors::Builder {
    let methods = vec![Method::GET, Method::OPTIONS];

    if allowed_origins.contains(&"*".to_string()) {
        warp::cors()
            .allow_any_origin()
            .allow_methods(methods)
            .allow_headers(vec!["content-type"])
    } else {
        let origins: Vec<&str> = allowed_origins.iter().map(|s| s.as_str()).collect();
        warp::cors()
            .allow_origins(origins)
            .allow_methods(methods)
            .allow_headers(vec!["content-type"])
    }
}

// ============================================================================
// REJECTION HANDLER
// ============================================================================

/// Global rejection handler for all API routes.
///
/// Converts warp rejections into standardized API responses with
/// appropriate HTTP status codes.
async fn handle_rejection(rej: Rejection) -> Result<impl Reply, std::convert::Infallible> {
    let (status, message) = if rej.is_not_found() {
        (StatusCode::NOT_FOUND, "Endpoint not found".to_string())
    } else if rej.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed".to_string(),
        )
    } else {
        error!("Unhandled rejection: {:?}", rej);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
        )
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(message),
        }),
        status,
    ))
}

// ============================================================================
// API SERVER IMPLEMENTATION
// ============================================================================

/// REST API server for the relay service.
///
/// Exposes read-only endpoints over the relay state so operators and
/// dashboards can watch cursors and failed envelopes without touching the
/// relay tasks.
pub struct ApiServer {
    /// Service configuration
    config: Arc<Config>,
    /// Relay state shared with the relay loop
    state: Arc<RelayState>,
    /// Registry the relay loop routes through
    registry: RelayerRegistry,
}

impl ApiServer {
    /// Creates a new API server over the relay's shared state.
    ///
    /// # Arguments
    ///
    /// * `config` - Service configuration
    /// * `state` - State handle obtained from `RelayLoop::state`
    /// * `registry` - The relay loop's registry
    pub fn new(config: Config, state: Arc<RelayState>, registry: RelayerRegistry) -> Self {
        Self {
            config: Arc::new(config),
            state,
            registry,
        }
    }

    /// Starts the API server and begins handling HTTP requests.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Server started successfully
    /// * `Err(anyhow::Error)` - Failed to start server
    pub async fn run(&self) -> Result<()> {
        info!(
            "Starting API server on {}:{}",
            self.config.api.host, self.config.api.port
        );

        let routes = self.create_routes();

        let addr: std::net::SocketAddr =
            format!("{}:{}", self.config.api.host, self.config.api.port)
                .parse()
                .context("Failed to parse API server address")?;

        warp::serve(routes).run(addr).await;

        Ok(())
    }

    /// Creates all API routes for the server.
    ///
    /// # Returns
    ///
    /// A warp filter containing all API routes
    pub(crate) fn create_routes(
        &self,
    ) -> impl Filter<Extract = impl warp::Reply, Error = std::convert::Infallible> + Clone {
        let state = self.state.clone();
        let registry = self.registry.clone();

        // Health check endpoint - returns service status
        let health = warp::path("health").and(warp::get()).map(|| {
            warp::reply::json(&ApiResponse::<String> {
                success: true,
                data: Some("GMP relay service is running".to_string()),
                error: None,
            })
        });

        // Relay status endpoint - cursors, registered chains, queue sizes
        let status = warp::path("status")
            .and(warp::get())
            .and(with_state(state.clone()))
            .and(with_registry(registry))
            .and_then(get_status_handler);

        // Failed envelopes endpoint - the operator-alert list
        let failed = warp::path!("envelopes" / "failed")
            .and(warp::get())
            .and(with_state(state.clone()))
            .and_then(get_failed_handler);

        // Pending envelopes endpoint - retry queues across all chains
        let pending = warp::path!("envelopes" / "pending")
            .and(warp::get())
            .and(with_state(state))
            .and_then(get_pending_handler);

        health
            .or(status)
            .or(failed)
            .or(pending)
            .with(create_cors_filter(&self.config.api.cors_origins))
            .recover(handle_rejection)
    }

    /// Public method for testing - exposes routes for integration tests
    pub fn test_routes(
        &self,
    ) -> impl Filter<Extract = impl warp::Reply, Error = std::convert::Infallible> + Clone {
        self.create_routes()
    }
}
