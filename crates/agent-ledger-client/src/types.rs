//! Wire types of the agent ledger API.
//!
//! Ledger records (accounts, events, postings) are the core crate's types; this module
//! only adds the request bodies and the response envelopes.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use agent_ledger_core::{
    Account, CreditEvent, CreditTransaction, Direction, EventType, Order, RewardType, SkillConfig,
};

// ============================================================================
// Service requests
// ============================================================================

/// Bill a paid agent action.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SpendRequest {
    /// Paying user.
    pub user_id: String,
    /// Agent whose action is billed.
    pub agent_id: String,
    /// Gross cost of the action.
    pub amount: Decimal,
    /// Share of the cost paid to the agent.
    pub agent_fee_rate: Decimal,
    /// User who referred the payer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer_id: Option<String>,
    /// Idempotency key. Strongly recommended; without it a retry bills twice.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_tx_id: Option<String>,
    /// Optional note.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Result of a spend.
#[derive(Debug, Clone, Deserialize)]
pub struct SpendReceipt {
    /// The payer's account after the spend.
    pub account: Account,
    /// The spend event.
    pub event: CreditEvent,
    /// Postings of the spend.
    pub transactions: Vec<CreditTransaction>,
    /// True when the idempotency key had already been used.
    pub already_applied: bool,
}

/// Ask whether a skill call may proceed.
#[derive(Debug, Clone, Serialize)]
pub struct AdmitRequest {
    /// The agent's configuration of the skill's category.
    pub config: SkillConfig,
    /// Skill name inside the category.
    pub skill: String,
    /// Calling user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Whether the caller owns the agent.
    pub is_private: bool,
}

/// Successful admission.
#[derive(Debug, Clone, Deserialize)]
pub struct AdmitResponse {
    /// Always true.
    pub admitted: bool,
    /// Category of the skill.
    pub category: String,
}

// ============================================================================
// Admin requests
// ============================================================================

/// Add purchased credits.
#[derive(Debug, Clone, Serialize)]
pub struct RechargeRequest {
    /// Idempotency key.
    pub upstream_tx_id: String,
    /// User to recharge.
    pub user_id: String,
    /// Amount to add.
    pub amount: Decimal,
    /// Optional note.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Add reward credits.
#[derive(Debug, Clone, Serialize)]
pub struct RewardRequest {
    /// Idempotency key.
    pub upstream_tx_id: String,
    /// User to reward.
    pub user_id: String,
    /// Amount to add.
    pub amount: Decimal,
    /// Optional note.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Kind of reward.
    pub reward_type: RewardType,
}

/// Filters of the global event feed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EventFeedQuery {
    /// Only events with this direction; the service lists expenses when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    /// Only events of this type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<EventType>,
    /// Listing order.
    pub order: Order,
    /// Id of the last event seen.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// Maximum number of events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// A posting together with its event.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionWithEvent {
    /// The posting.
    #[serde(flatten)]
    pub transaction: CreditTransaction,
    /// Its event.
    #[serde(default)]
    pub event: Option<CreditEvent>,
}

// ============================================================================
// Errors
// ============================================================================

/// API error response body.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    /// Error details.
    pub error: ApiErrorDetail,
}

/// API error detail.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorDetail {
    /// Error code.
    pub code: String,
    /// Error message.
    pub message: String,
    /// Additional details.
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}
