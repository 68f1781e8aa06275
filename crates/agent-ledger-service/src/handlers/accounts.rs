//! Credit account handlers: lookup, recharge, reward, quota and refill.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;

use agent_ledger_core::{
    Account, AgentId, AgentStatistics, Owner, OwnerId, OwnerType, QuotaUpdate, RefillEpoch,
    RewardType,
};
use agent_ledger_store::RefillSummary;

use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::handlers::parse_id;
use crate::state::AppState;

/// Recharge request.
#[derive(Debug, Deserialize)]
pub struct RechargeRequest {
    /// Upstream transaction ID, the idempotency key.
    pub upstream_tx_id: String,
    /// User to recharge.
    pub user_id: String,
    /// Amount to add.
    pub amount: Decimal,
    /// Optional note.
    #[serde(default)]
    pub note: Option<String>,
}

/// Reward request.
#[derive(Debug, Deserialize)]
pub struct RewardRequest {
    /// Upstream transaction ID, the idempotency key.
    pub upstream_tx_id: String,
    /// User to reward.
    pub user_id: String,
    /// Amount to add.
    pub amount: Decimal,
    /// Optional note.
    #[serde(default)]
    pub note: Option<String>,
    /// Kind of reward.
    #[serde(default)]
    pub reward_type: RewardType,
}

/// Daily quota update request.
#[derive(Debug, Deserialize)]
pub struct UpdateDailyQuotaRequest {
    /// Upstream transaction ID, the idempotency key.
    pub upstream_tx_id: String,
    /// New daily quota.
    #[serde(default)]
    pub free_quota: Option<Decimal>,
    /// New hourly refill amount.
    #[serde(default)]
    pub refill_amount: Option<Decimal>,
    /// Why the quota changed.
    #[serde(default)]
    pub note: Option<String>,
}

/// Get an account, creating it on first reference.
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Path((owner_type, owner_id)): Path<(String, String)>,
) -> Result<Json<Account>, ApiError> {
    let owner_type: OwnerType = owner_type.parse()?;
    let owner = Owner::new(owner_type, parse_id(&owner_id)?);

    let account = state.run(move |ledger| ledger.get_or_create(&owner)).await?;
    Ok(Json(account))
}

/// Add purchased credits to a user.
pub async fn recharge(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(body): Json<RechargeRequest>,
) -> Result<(StatusCode, Json<Account>), ApiError> {
    let owner = Owner::user(parse_id(&body.user_id)?);

    let account = state
        .run(move |ledger| {
            ledger.recharge(&owner, body.amount, &body.upstream_tx_id, body.note.as_deref())
        })
        .await?;

    tracing::info!(admin_id = %admin.admin_id, account_id = %account.id, "Recharge accepted");
    Ok((StatusCode::CREATED, Json(account)))
}

/// Add reward credits to a user.
pub async fn reward(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(body): Json<RewardRequest>,
) -> Result<(StatusCode, Json<Account>), ApiError> {
    let owner = Owner::user(parse_id(&body.user_id)?);

    let account = state
        .run(move |ledger| {
            ledger.reward(
                &owner,
                body.amount,
                &body.upstream_tx_id,
                body.note.as_deref(),
                body.reward_type,
            )
        })
        .await?;

    tracing::info!(admin_id = %admin.admin_id, account_id = %account.id, "Reward accepted");
    Ok((StatusCode::CREATED, Json(account)))
}

/// Change a user's daily quota and refill amount.
pub async fn update_daily_quota(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Path(user_id): Path<String>,
    Json(body): Json<UpdateDailyQuotaRequest>,
) -> Result<Json<Account>, ApiError> {
    let user_id: OwnerId = parse_id(&user_id)?;
    let update = QuotaUpdate {
        free_quota: body.free_quota,
        refill_amount: body.refill_amount,
    };

    let account = state
        .run(move |ledger| {
            ledger.update_daily_quota(&user_id, update, &body.upstream_tx_id, body.note.as_deref())
        })
        .await?;

    tracing::info!(admin_id = %admin.admin_id, account_id = %account.id, "Daily quota changed");
    Ok(Json(account))
}

/// Run a refill pass for the current hour.
pub async fn refill(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
) -> Result<Json<RefillSummary>, ApiError> {
    let epoch = RefillEpoch::current();
    tracing::info!(admin_id = %admin.admin_id, %epoch, "Manual refill requested");

    let summary = state.run(move |ledger| ledger.refill_all(epoch)).await?;
    Ok(Json(summary))
}

/// Income statistics of an agent.
pub async fn agent_statistics(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Path(agent_id): Path<String>,
) -> Result<Json<AgentStatistics>, ApiError> {
    let agent_id: AgentId = parse_id(&agent_id)?;

    let stats = state
        .run(move |ledger| ledger.agent_statistics(&agent_id, Utc::now()))
        .await?;
    Ok(Json(stats))
}
