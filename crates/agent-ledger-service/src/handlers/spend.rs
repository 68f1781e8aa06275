//! Billing hook: charge a user for a paid agent action.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;

use agent_ledger_core::{FeeSplitPolicy, Owner, ReferrerShare};
use agent_ledger_store::{SpendReceipt, SpendRequest};

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::handlers::parse_id;
use crate::state::AppState;

/// Spend request sent by the agent runtime.
#[derive(Debug, Deserialize)]
pub struct SpendBody {
    /// Paying user.
    pub user_id: String,
    /// Agent whose action is billed.
    pub agent_id: String,
    /// Gross cost of the action.
    pub amount: Decimal,
    /// Share of the cost paid to the agent.
    #[serde(default)]
    pub agent_fee_rate: Decimal,
    /// User who referred the payer, if any.
    #[serde(default)]
    pub referrer_id: Option<String>,
    /// Idempotency key.
    #[serde(default)]
    pub upstream_tx_id: Option<String>,
    /// Optional note.
    #[serde(default)]
    pub note: Option<String>,
}

/// Bill a paid agent action.
///
/// Returns 201 when the spend is written and 200 when the idempotency key was already
/// used.
pub async fn spend(
    State(state): State<Arc<AppState>>,
    service: ServiceAuth,
    Json(body): Json<SpendBody>,
) -> Result<(StatusCode, Json<SpendReceipt>), ApiError> {
    let referrer = body
        .referrer_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .map(|id| {
            parse_id(id).map(|owner_id| ReferrerShare {
                owner_id,
                rate: state.config.fee_referrer_rate,
            })
        })
        .transpose()?;

    let request = SpendRequest {
        owner: Owner::user(parse_id(&body.user_id)?),
        agent_id: parse_id(&body.agent_id)?,
        amount: body.amount,
        fee_policy: FeeSplitPolicy {
            platform_rate: state.config.fee_platform_rate,
            agent_rate: body.agent_fee_rate,
            referrer,
        },
        upstream_tx_id: body.upstream_tx_id,
        note: body.note,
    };

    let receipt = state.run(move |ledger| ledger.spend(&request)).await?;

    let status = if receipt.already_applied {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    tracing::debug!(
        service = %service.service_name,
        event_id = %receipt.event.id,
        already_applied = receipt.already_applied,
        "Spend handled"
    );
    Ok((status, Json(receipt)))
}
