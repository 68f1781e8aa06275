//! Credit account integration tests.

mod common;

use axum::http::StatusCode;
use common::{decimal, TestHarness};
use rust_decimal_macros::dec;
use serde_json::json;

// ============================================================================
// Get or create
// ============================================================================

#[tokio::test]
async fn get_account_creates_on_first_reference() {
    let harness = TestHarness::with_quota("10", "2");

    let response = harness.server.get("/v1/credit/accounts/user/alice").await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["owner_type"], "user");
    assert_eq!(body["owner_id"], "alice");
    assert_eq!(decimal(&body["free_quota"]), dec!(10));
    assert_eq!(decimal(&body["free_credits"]), dec!(10));

    let again: serde_json::Value = harness
        .server
        .get("/v1/credit/accounts/user/alice")
        .await
        .json();
    assert_eq!(again["id"], body["id"]);
}

#[tokio::test]
async fn get_account_rejects_unknown_owner_type() {
    let harness = TestHarness::new();

    let response = harness.server.get("/v1/credit/accounts/robot/r1").await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "bad_request");
}

// ============================================================================
// Recharge and reward
// ============================================================================

#[tokio::test]
async fn recharge_is_idempotent() {
    let harness = TestHarness::new();

    let first = harness.recharge("alice", "100", "pay_1").await;
    assert_eq!(decimal(&first["credits"]), dec!(100));

    let second = harness.recharge("alice", "100", "pay_1").await;
    assert_eq!(decimal(&second["credits"]), dec!(100));

    let third = harness.recharge("alice", "50", "pay_2").await;
    assert_eq!(decimal(&third["credits"]), dec!(150));
}

#[tokio::test]
async fn recharge_rejects_non_positive_amount() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/credit/recharge")
        .json(&json!({
            "user_id": "alice",
            "amount": "0",
            "upstream_tx_id": "pay_1",
        }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn recharge_rejects_excess_precision() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/credit/recharge")
        .json(&json!({
            "user_id": "alice",
            "amount": "1.00001",
            "upstream_tx_id": "pay_1",
        }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn reward_credits_reward_pool() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/credit/reward")
        .json(&json!({
            "user_id": "alice",
            "amount": "5",
            "upstream_tx_id": "bonus_1",
            "reward_type": "event_reward",
        }))
        .await;

    response.assert_status(StatusCode::CREATED);
    let body: serde_json::Value = response.json();
    assert_eq!(decimal(&body["reward_credits"]), dec!(5));

    let event: serde_json::Value = harness
        .server
        .get("/v1/credit/event")
        .add_query_param("upstream_tx_id", "bonus_1")
        .await
        .json();
    assert_eq!(event["event_type"], "event_reward");
}

// ============================================================================
// Quota and refill
// ============================================================================

#[tokio::test]
async fn daily_quota_rejects_refill_above_quota() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .put("/v1/credit/users/alice/daily-quota")
        .json(&json!({
            "upstream_tx_id": "q_1",
            "free_quota": "5",
            "refill_amount": "10",
        }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let response = harness
        .server
        .put("/v1/credit/users/alice/daily-quota")
        .json(&json!({
            "upstream_tx_id": "q_2",
            "free_quota": "5",
            "refill_amount": "5",
            "note": "plan upgrade",
        }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(decimal(&body["free_quota"]), dec!(5));
    assert_eq!(decimal(&body["refill_amount"]), dec!(5));
}

#[tokio::test]
async fn daily_quota_requires_a_value() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .put("/v1/credit/users/alice/daily-quota")
        .json(&json!({ "upstream_tx_id": "q_1" }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn refill_tops_up_spent_free_credits() {
    let harness = TestHarness::with_quota("10", "5");

    harness
        .spend(json!({ "user_id": "alice", "agent_id": "agent_1", "amount": "3" }))
        .await
        .assert_status(StatusCode::CREATED);

    let response = harness.server.post("/v1/credit/refill").await;
    response.assert_status_ok();
    let summary: serde_json::Value = response.json();
    assert_eq!(summary["refilled"], 1);

    let account: serde_json::Value = harness
        .server
        .get("/v1/credit/accounts/user/alice")
        .await
        .json();
    assert_eq!(decimal(&account["free_credits"]), dec!(10));

    let again: serde_json::Value = harness.server.post("/v1/credit/refill").await.json();
    assert_eq!(again["refilled"], 0);
}

// ============================================================================
// Statistics
// ============================================================================

#[tokio::test]
async fn agent_statistics_sum_agent_income() {
    let harness = TestHarness::new();
    harness.recharge("alice", "100", "pay_1").await;

    harness
        .spend(json!({
            "user_id": "alice",
            "agent_id": "agent_1",
            "amount": "10",
            "agent_fee_rate": "0.2",
        }))
        .await
        .assert_status(StatusCode::CREATED);

    let response = harness
        .server
        .get("/v1/credit/agents/agent_1/statistics")
        .await;
    response.assert_status_ok();
    let stats: serde_json::Value = response.json();
    assert_eq!(decimal(&stats["total_income"]), dec!(10));
    assert_eq!(decimal(&stats["net_income"]), dec!(2));
    assert_eq!(decimal(&stats["permanent_income"]), dec!(10));
    assert_eq!(decimal(&stats["permanent_profit"]), dec!(2));
    assert_eq!(decimal(&stats["balance"]), dec!(2));
}
