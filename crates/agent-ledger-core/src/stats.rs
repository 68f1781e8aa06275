//! Reporting aggregates over an agent's events.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::account::Account;
use crate::amount::round_amount;
use crate::event::{CreditEvent, EventType};
use crate::ids::{AccountId, AgentId};

/// Income statistics of one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStatistics {
    /// The agent.
    pub agent_id: AgentId,
    /// The agent's own account.
    pub account_id: AccountId,
    /// Total balance of the agent's account.
    pub balance: Decimal,
    /// Sum of `total_amount` over the agent's events.
    pub total_income: Decimal,
    /// Sum of `fee_agent_amount` over the agent's events.
    pub net_income: Decimal,
    /// Sum of `permanent_amount` over the agent's events.
    pub permanent_income: Decimal,
    /// `net_income * permanent_income / total_income`, 0 when there is no income.
    pub permanent_profit: Decimal,
    /// `total_income` over the last 24 hours.
    pub last_24h_income: Decimal,
    /// `permanent_income` over the last 24 hours.
    pub last_24h_permanent_income: Decimal,
    /// Mean cost of the agent's paid actions.
    pub avg_action_cost: Decimal,
    /// Cheapest paid action.
    pub min_action_cost: Decimal,
    /// Most expensive paid action.
    pub max_action_cost: Decimal,
}

/// Derived profit ratio, rounded half-up to four places.
#[must_use]
pub fn permanent_profit(
    net_income: Decimal,
    permanent_income: Decimal,
    total_income: Decimal,
) -> Decimal {
    if total_income.is_zero() {
        return Decimal::ZERO;
    }
    let ratio = net_income
        .checked_mul(permanent_income)
        .and_then(|product| product.checked_div(total_income))
        .or_else(|| {
            permanent_income
                .checked_div(total_income)
                .and_then(|share| net_income.checked_mul(share))
        });
    ratio.map_or(Decimal::ZERO, round_amount)
}

/// Running aggregate, fed one event at a time.
#[derive(Debug, Clone)]
pub struct StatisticsBuilder {
    since: DateTime<Utc>,
    total_income: Decimal,
    net_income: Decimal,
    permanent_income: Decimal,
    last_24h_income: Decimal,
    last_24h_permanent_income: Decimal,
    action_count: u64,
    action_sum: Decimal,
    min_action_cost: Option<Decimal>,
    max_action_cost: Option<Decimal>,
}

impl StatisticsBuilder {
    /// Start an aggregate whose 24 hour window ends at `now`.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            since: now - Duration::hours(24),
            total_income: Decimal::ZERO,
            net_income: Decimal::ZERO,
            permanent_income: Decimal::ZERO,
            last_24h_income: Decimal::ZERO,
            last_24h_permanent_income: Decimal::ZERO,
            action_count: 0,
            action_sum: Decimal::ZERO,
            min_action_cost: None,
            max_action_cost: None,
        }
    }

    /// Add one of the agent's events. Sums saturate at the decimal range.
    pub fn push(&mut self, event: &CreditEvent) {
        self.total_income = self.total_income.saturating_add(event.total_amount);
        self.net_income = self.net_income.saturating_add(event.fee_agent_amount);
        self.permanent_income = self.permanent_income.saturating_add(event.permanent_amount);
        if event.created_at >= self.since {
            self.last_24h_income = self.last_24h_income.saturating_add(event.total_amount);
            self.last_24h_permanent_income = self
                .last_24h_permanent_income
                .saturating_add(event.permanent_amount);
        }

        if event.event_type == EventType::Spend {
            let cost = event.total_amount;
            self.action_count += 1;
            self.action_sum = self.action_sum.saturating_add(cost);
            self.min_action_cost = Some(self.min_action_cost.map_or(cost, |m| m.min(cost)));
            self.max_action_cost = Some(self.max_action_cost.map_or(cost, |m| m.max(cost)));
        }
    }

    /// Finish the aggregate for the agent's account.
    #[must_use]
    pub fn finish(self, agent_id: AgentId, account: &Account) -> AgentStatistics {
        let avg_action_cost = if self.action_count == 0 {
            Decimal::ZERO
        } else {
            round_amount(self.action_sum / Decimal::from(self.action_count))
        };

        AgentStatistics {
            agent_id,
            account_id: account.id,
            balance: account.total_balance(),
            total_income: self.total_income,
            net_income: self.net_income,
            permanent_income: self.permanent_income,
            permanent_profit: permanent_profit(
                self.net_income,
                self.permanent_income,
                self.total_income,
            ),
            last_24h_income: self.last_24h_income,
            last_24h_permanent_income: self.last_24h_permanent_income,
            avg_action_cost,
            min_action_cost: self.min_action_cost.unwrap_or_default(),
            max_action_cost: self.max_action_cost.unwrap_or_default(),
        }
    }
}
