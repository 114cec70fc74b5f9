//! Tests for the REST API server over the relay state.

mod helpers;

use std::sync::Arc;
use tokio::sync::watch;

use gmp_relay::api::ApiServer;
use gmp_relay::registry::RelayerRegistry;
use gmp_relay::relay::RelayLoop;

use helpers::{
    build_contract_call_event, build_test_config, build_test_relay_config, poll_outcome,
    MockAdapter, TEST_COSMOS_CHAIN, TEST_EVM_CHAIN,
};

/// Builds an API server over a relay that already processed one
/// unroutable event (so the failed list is non-empty) and one settled
/// event (so a cursor exists).
async fn build_api_with_history() -> ApiServer {
    let registry = RelayerRegistry::new();
    let source = MockAdapter::new(TEST_EVM_CHAIN);
    let destination = MockAdapter::new(TEST_COSMOS_CHAIN);
    registry.set_relayer(TEST_EVM_CHAIN, source.clone()).await;
    registry
        .set_relayer(TEST_COSMOS_CHAIN, destination.clone())
        .await;

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let relay = Arc::new(RelayLoop::new(
        registry.clone(),
        build_test_relay_config(3),
        &[],
        shutdown_rx,
    ));

    let mut unroutable = build_contract_call_event(5, 0);
    unroutable.destination_chain = "osmosis".to_string();
    source.script_poll(Ok(poll_outcome(
        vec![unroutable, build_contract_call_event(5, 1)],
        5,
    )));
    relay.relay().await;

    ApiServer::new(build_test_config(), relay.state(), registry)
}

/// Test the health endpoint answers with a success envelope.
#[tokio::test]
async fn health_endpoint_reports_running() {
    let api = build_api_with_history().await;

    let response = warp::test::request()
        .method("GET")
        .path("/health")
        .reply(&api.test_routes())
        .await;

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["success"], true);
}

/// Test the status endpoint exposes chains, cursors, and queue sizes.
/// Why: operators watch this endpoint to see cursor progress and failure
/// counts without reading logs.
#[tokio::test]
async fn status_endpoint_exposes_relay_state() {
    let api = build_api_with_history().await;

    let response = warp::test::request()
        .method("GET")
        .path("/status")
        .reply(&api.test_routes())
        .await;

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["success"], true);

    let status = &body["data"];
    assert_eq!(
        status["registered_chains"],
        serde_json::json!([TEST_COSMOS_CHAIN, TEST_EVM_CHAIN])
    );
    assert_eq!(status["failed_count"], 1);
    assert_eq!(status["pending_count"], 0);
    assert_eq!(status["cursors"][0]["chain"], TEST_EVM_CHAIN);
    assert_eq!(status["cursors"][0]["height"], 6);
}

/// Test the failed envelopes endpoint returns the operator-alert list.
/// Why: every terminally failed envelope must be observable, not only
/// logged.
#[tokio::test]
async fn failed_endpoint_lists_failed_envelopes() {
    let api = build_api_with_history().await;

    let response = warp::test::request()
        .method("GET")
        .path("/envelopes/failed")
        .reply(&api.test_routes())
        .await;

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    let failed = body["data"].as_array().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["status"], "Failed");
    assert_eq!(failed[0]["last_error"], "UnroutableDestination");
    assert_eq!(failed[0]["event"]["destination_chain"], "osmosis");
}

/// Test the pending envelopes endpoint returns an empty list when the
/// retry queues are drained.
#[tokio::test]
async fn pending_endpoint_empty_when_drained() {
    let api = build_api_with_history().await;

    let response = warp::test::request()
        .method("GET")
        .path("/envelopes/pending")
        .reply(&api.test_routes())
        .await;

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 0);
}

/// Test unknown paths produce the standardized not-found envelope.
#[tokio::test]
async fn unknown_path_returns_not_found() {
    let api = build_api_with_history().await;

    let response = warp::test::request()
        .method("GET")
        .path("/nope")
        .reply(&api.test_routes())
        .await;

    assert_eq!(response.status(), 404);
    let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["success"], false);
}
