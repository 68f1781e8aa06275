//! Credit events.
//!
//! An event is the immutable audit record of one business occurrence. Every balance change
//! is posted through the transactions of exactly one event; only the `note` may change
//! after creation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::account::{CreditType, PoolSplit};
use crate::error::{LedgerError, Result};
use crate::fees::FeeSplit;
use crate::ids::{AccountId, AgentId, EventId};

/// Kind of business occurrence recorded by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Purchased credits.
    Recharge,
    /// Generic reward.
    Reward,
    /// Reward for taking part in a platform event.
    EventReward,
    /// Bonus granted together with a recharge.
    RechargeBonus,
    /// Paid agent action.
    Spend,
    /// Refund of a previous spend.
    Refund,
    /// Manual correction.
    Adjustment,
    /// Daily quota configuration change.
    DailyQuota,
    /// Hourly free credit refill.
    Refill,
}

impl EventType {
    /// Stable string form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Recharge => "recharge",
            Self::Reward => "reward",
            Self::EventReward => "event_reward",
            Self::RechargeBonus => "recharge_bonus",
            Self::Spend => "spend",
            Self::Refund => "refund",
            Self::Adjustment => "adjustment",
            Self::DailyQuota => "daily_quota",
            Self::Refill => "refill",
        }
    }

    /// Natural direction of the event for the account it is recorded against.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        match self {
            Self::Spend => Direction::Expense,
            _ => Direction::Income,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "recharge" => Self::Recharge,
            "reward" => Self::Reward,
            "event_reward" => Self::EventReward,
            "recharge_bonus" => Self::RechargeBonus,
            "spend" => Self::Spend,
            "refund" => Self::Refund,
            "adjustment" => Self::Adjustment,
            "daily_quota" => Self::DailyQuota,
            "refill" => Self::Refill,
            other => return Err(LedgerError::invalid(format!("unknown event type: {other}"))),
        })
    }
}

/// Whether an event adds to or removes from the account's balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Credits received.
    Income,
    /// Credits spent.
    Expense,
}

impl Direction {
    /// Stable string form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
        }
    }
}

impl FromStr for Direction {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "income" => Ok(Self::Income),
            "expense" => Ok(Self::Expense),
            other => Err(LedgerError::invalid(format!("unknown direction: {other}"))),
        }
    }
}

/// Flavour of a reward; selects the event type recorded for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardType {
    /// Generic reward.
    #[default]
    Reward,
    /// Platform event participation reward.
    EventReward,
    /// Recharge bonus.
    RechargeBonus,
}

impl RewardType {
    /// Event type recorded for this reward.
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        match self {
            Self::Reward => EventType::Reward,
            Self::EventReward => EventType::EventReward,
            Self::RechargeBonus => EventType::RechargeBonus,
        }
    }
}

/// An immutable record of one business occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditEvent {
    /// Time-ordered identifier.
    pub id: EventId,

    /// Kind of occurrence.
    pub event_type: EventType,

    /// Income or expense for `account_id`.
    pub direction: Direction,

    /// Caller-supplied idempotency key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_tx_id: Option<String>,

    /// The account the event is recorded against.
    pub account_id: AccountId,

    /// Agent whose action produced the event, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,

    /// Gross amount.
    pub total_amount: Decimal,

    /// Portion kept by the platform as consumption.
    pub base_amount: Decimal,

    /// Platform fee portion.
    pub fee_platform_amount: Decimal,

    /// Agent owner fee portion.
    pub fee_agent_amount: Decimal,

    /// Referrer fee portion.
    pub fee_referrer_amount: Decimal,

    /// Portion drawn from or added to the free pool.
    pub free_amount: Decimal,

    /// Portion drawn from or added to the reward pool.
    pub reward_amount: Decimal,

    /// Portion drawn from or added to the purchased pool.
    pub credit_amount: Decimal,

    /// Portion not funded by the refillable free pool.
    pub permanent_amount: Decimal,

    /// Account balance after the event was applied.
    pub balance_after: Decimal,

    /// Free-text note; the only mutable field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,

    /// Structured context, e.g. quota values before and after a change.
    #[serde(default)]
    pub metadata: serde_json::Value,

    /// When the event was recorded.
    pub created_at: DateTime<Utc>,
}

impl CreditEvent {
    fn blank(event_type: EventType, account_id: AccountId, total_amount: Decimal) -> Self {
        Self {
            id: EventId::generate(),
            event_type,
            direction: event_type.direction(),
            upstream_tx_id: None,
            account_id,
            agent_id: None,
            total_amount,
            base_amount: total_amount,
            fee_platform_amount: Decimal::ZERO,
            fee_agent_amount: Decimal::ZERO,
            fee_referrer_amount: Decimal::ZERO,
            free_amount: Decimal::ZERO,
            reward_amount: Decimal::ZERO,
            credit_amount: Decimal::ZERO,
            permanent_amount: Decimal::ZERO,
            balance_after: Decimal::ZERO,
            note: None,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    /// An income event crediting `amount` into one pool.
    #[must_use]
    pub fn income(
        event_type: EventType,
        account_id: AccountId,
        amount: Decimal,
        pool: CreditType,
    ) -> Self {
        let mut event = Self::blank(event_type, account_id, amount);
        match pool {
            CreditType::Free => event.free_amount = amount,
            CreditType::Reward => event.reward_amount = amount,
            CreditType::Permanent => event.credit_amount = amount,
        }
        event.permanent_amount = event.reward_amount + event.credit_amount;
        event
    }

    /// A spend event with its recipient and source splits.
    #[must_use]
    pub fn spend(
        account_id: AccountId,
        agent_id: AgentId,
        fees: &FeeSplit,
        sources: &PoolSplit,
    ) -> Self {
        let mut event = Self::blank(EventType::Spend, account_id, fees.total);
        event.agent_id = Some(agent_id);
        event.base_amount = fees.base;
        event.fee_platform_amount = fees.platform;
        event.fee_agent_amount = fees.agent;
        event.fee_referrer_amount = fees.referrer;
        event.free_amount = sources.free;
        event.reward_amount = sources.reward;
        event.credit_amount = sources.permanent;
        event.permanent_amount = sources.permanent_amount();
        event
    }

    /// An audit-only event that moves no credits.
    #[must_use]
    pub fn audit(event_type: EventType, account_id: AccountId, metadata: serde_json::Value) -> Self {
        let mut event = Self::blank(event_type, account_id, Decimal::ZERO);
        event.metadata = metadata;
        event
    }

    /// Attach the idempotency key.
    #[must_use]
    pub fn with_upstream_tx_id(mut self, upstream_tx_id: Option<String>) -> Self {
        self.upstream_tx_id = upstream_tx_id;
        self
    }

    /// Attach a note.
    #[must_use]
    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note;
        self
    }

    /// Check that both splits add up to the total.
    ///
    /// # Errors
    ///
    /// Returns `Invariant` when a split does not sum to `total_amount`.
    pub fn validate(&self) -> Result<()> {
        let recipients = self.base_amount
            + self.fee_platform_amount
            + self.fee_agent_amount
            + self.fee_referrer_amount;
        if recipients != self.total_amount {
            return Err(LedgerError::Invariant(format!(
                "event {}: fee split {recipients} != total {}",
                self.id, self.total_amount
            )));
        }

        let sources = self.free_amount + self.reward_amount + self.credit_amount;
        if sources != self.total_amount {
            return Err(LedgerError::Invariant(format!(
                "event {}: source split {sources} != total {}",
                self.id, self.total_amount
            )));
        }

        if self.permanent_amount != self.reward_amount + self.credit_amount {
            return Err(LedgerError::Invariant(format!(
                "event {}: permanent amount out of sync",
                self.id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn income_event_split() {
        let event = CreditEvent::income(
            EventType::Recharge,
            AccountId::generate(),
            dec!(100),
            CreditType::Permanent,
        );
        assert_eq!(event.direction, Direction::Income);
        assert_eq!(event.credit_amount, dec!(100));
        assert_eq!(event.permanent_amount, dec!(100));
        event.validate().unwrap();
    }

    #[test]
    fn refill_is_not_permanent() {
        let event = CreditEvent::income(
            EventType::Refill,
            AccountId::generate(),
            dec!(5),
            CreditType::Free,
        );
        assert_eq!(event.permanent_amount, dec!(0));
        event.validate().unwrap();
    }

    #[test]
    fn spend_event_split() {
        let fees = FeeSplit {
            total: dec!(10),
            base: dec!(8),
            platform: dec!(1),
            agent: dec!(0.5),
            referrer: dec!(0.5),
        };
        let sources = PoolSplit {
            free: dec!(4),
            reward: dec!(1),
            permanent: dec!(5),
        };
        let event = CreditEvent::spend(
            AccountId::generate(),
            AgentId::new("agent-1").unwrap(),
            &fees,
            &sources,
        );
        assert_eq!(event.direction, Direction::Expense);
        assert_eq!(event.permanent_amount, dec!(6));
        event.validate().unwrap();
    }

    #[test]
    fn broken_split_is_rejected() {
        let mut event = CreditEvent::income(
            EventType::Reward,
            AccountId::generate(),
            dec!(10),
            CreditType::Reward,
        );
        event.fee_platform_amount = dec!(1);
        assert!(matches!(event.validate(), Err(LedgerError::Invariant(_))));
    }

    #[test]
    fn audit_event_has_zero_total() {
        let event = CreditEvent::audit(
            EventType::DailyQuota,
            AccountId::generate(),
            serde_json::json!({ "free_quota": { "before": "0", "after": "5" } }),
        );
        assert_eq!(event.total_amount, dec!(0));
        event.validate().unwrap();
    }

    #[test]
    fn reward_type_selects_event_type() {
        assert_eq!(RewardType::default().event_type(), EventType::Reward);
        assert_eq!(
            RewardType::RechargeBonus.event_type(),
            EventType::RechargeBonus
        );
    }

    #[test]
    fn event_type_parse() {
        assert_eq!("daily_quota".parse::<EventType>().unwrap(), EventType::DailyQuota);
        assert!("bogus".parse::<EventType>().is_err());
        assert_eq!("expense".parse::<Direction>().unwrap(), Direction::Expense);
    }
}
