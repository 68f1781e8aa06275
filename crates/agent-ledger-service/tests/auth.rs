//! Admin authentication integration tests.

mod common;

use axum::http::StatusCode;
use common::TestHarness;
use serde_json::json;

fn secured() -> TestHarness {
    TestHarness::with_config(|config| config.admin_auth_enabled = true)
}

#[tokio::test]
async fn admin_routes_require_token_when_enabled() {
    let harness = secured();

    let response = harness.server.get("/v1/credit/accounts/user/alice").await;

    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "unauthorized");
}

#[tokio::test]
async fn admin_routes_accept_signed_token() {
    let harness = secured();

    let response = harness
        .server
        .post("/v1/credit/recharge")
        .add_header("authorization", TestHarness::admin_auth_header())
        .json(&json!({ "user_id": "alice", "amount": "5", "upstream_tx_id": "pay_1" }))
        .await;

    response.assert_status(StatusCode::CREATED);
}

#[tokio::test]
async fn admin_routes_reject_garbage_token() {
    let harness = secured();

    harness
        .server
        .get("/v1/credit/accounts/user/alice")
        .add_header("authorization", "Bearer not-a-jwt")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_stays_public() {
    let harness = secured();

    harness.server.get("/health").await.assert_status_ok();
}
