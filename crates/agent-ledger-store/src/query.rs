//! Scan descriptions shared by every storage backend.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use agent_ledger_core::{
    AccountId, AgentId, CreditDebit, CreditEvent, CreditTransaction, Direction, EventId,
    EventType, Order, RefillEpoch, TransactionId, TransactionType,
};

/// Optional filters on an event listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    /// Only events with this direction.
    #[serde(default)]
    pub direction: Option<Direction>,

    /// Only events of this type.
    #[serde(default)]
    pub event_type: Option<EventType>,

    /// Inclusive lower bound on `created_at`.
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,

    /// Exclusive upper bound on `created_at`.
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
}

/// Which index an event scan walks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventScope {
    /// Every event.
    All,
    /// Events recorded against one account.
    Account(AccountId),
    /// Events produced by one agent.
    Agent(AgentId),
}

/// A bounded scan over events in id order.
#[derive(Debug, Clone)]
pub struct EventQuery {
    /// Index to walk.
    pub scope: EventScope,
    /// Row filters.
    pub filter: EventFilter,
    /// Only events that paid the agent a fee.
    pub agent_fee_only: bool,
    /// Exclusive start position.
    pub cursor: Option<EventId>,
    /// Walk direction.
    pub order: Order,
    /// Maximum rows to return.
    pub limit: usize,
}

impl EventQuery {
    /// Scan of `scope` with no filters, newest first.
    #[must_use]
    pub fn new(scope: EventScope, limit: usize) -> Self {
        Self {
            scope,
            filter: EventFilter::default(),
            agent_fee_only: false,
            cursor: None,
            order: Order::Desc,
            limit,
        }
    }

    /// Whether `event` belongs in the result.
    #[must_use]
    pub fn matches(&self, event: &CreditEvent) -> bool {
        let in_scope = match &self.scope {
            EventScope::All => true,
            EventScope::Account(id) => event.account_id == *id,
            EventScope::Agent(id) => event.agent_id.as_ref() == Some(id),
        };
        let filter = &self.filter;
        in_scope
            && filter.direction.map_or(true, |d| event.direction == d)
            && filter.event_type.map_or(true, |t| event.event_type == t)
            && filter.start_at.map_or(true, |t| event.created_at >= t)
            && filter.end_at.map_or(true, |t| event.created_at < t)
            && (!self.agent_fee_only || event.fee_agent_amount > Decimal::ZERO)
    }

    /// Whether the walk has left the time range for good.
    ///
    /// Ids are time-ordered, so once a descending walk is older than `start_at` (or an
    /// ascending walk reaches `end_at`) nothing further can match.
    #[must_use]
    pub fn is_past_range(&self, event: &CreditEvent) -> bool {
        match self.order {
            Order::Desc => self.filter.start_at.is_some_and(|t| event.created_at < t),
            Order::Asc => self.filter.end_at.is_some_and(|t| event.created_at >= t),
        }
    }
}

/// A bounded scan over one account's postings, newest first.
#[derive(Debug, Clone)]
pub struct TransactionQuery {
    /// Account whose postings are listed.
    pub account_id: AccountId,
    /// Only these transaction types; empty means all.
    pub tx_types: Vec<TransactionType>,
    /// Only this side.
    pub credit_debit: Option<CreditDebit>,
    /// Exclusive start position.
    pub cursor: Option<TransactionId>,
    /// Maximum rows to return.
    pub limit: usize,
}

impl TransactionQuery {
    /// Whether `tx` belongs in the result.
    #[must_use]
    pub fn matches(&self, tx: &CreditTransaction) -> bool {
        tx.account_id == self.account_id
            && (self.tx_types.is_empty() || self.tx_types.contains(&tx.tx_type))
            && self.credit_debit.map_or(true, |cd| tx.credit_debit == cd)
    }
}

/// Last completed run of a background task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskWatermark {
    /// Task key, e.g. `quota_refill`.
    pub task: String,
    /// Last epoch the task completed.
    pub epoch: RefillEpoch,
    /// When the run finished.
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_ledger_core::{AccountId, CreditType, FeeSplit, PoolSplit};
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn spend(agent_fee: Decimal) -> CreditEvent {
        let fees = FeeSplit {
            total: dec!(1),
            base: dec!(1) - agent_fee,
            platform: dec!(0),
            agent: agent_fee,
            referrer: dec!(0),
        };
        let sources = PoolSplit {
            free: dec!(1),
            reward: dec!(0),
            permanent: dec!(0),
        };
        CreditEvent::spend(
            AccountId::generate(),
            AgentId::new("a1").unwrap(),
            &fees,
            &sources,
        )
    }

    #[test]
    fn agent_fee_filter() {
        let mut query = EventQuery::new(EventScope::Agent(AgentId::new("a1").unwrap()), 10);
        query.agent_fee_only = true;
        assert!(query.matches(&spend(dec!(0.1))));
        assert!(!query.matches(&spend(dec!(0))));

        query.scope = EventScope::Agent(AgentId::new("a2").unwrap());
        assert!(!query.matches(&spend(dec!(0.1))));
    }

    #[test]
    fn time_range_is_half_open() {
        let event = CreditEvent::income(
            EventType::Recharge,
            AccountId::generate(),
            dec!(1),
            CreditType::Permanent,
        );
        let mut query = EventQuery::new(EventScope::All, 10);
        query.filter.start_at = Some(event.created_at);
        assert!(query.matches(&event));

        query.filter.end_at = Some(event.created_at);
        assert!(!query.matches(&event));
    }

    #[test]
    fn range_end_detection() {
        let event = CreditEvent::income(
            EventType::Recharge,
            AccountId::generate(),
            dec!(1),
            CreditType::Permanent,
        );
        let mut query = EventQuery::new(EventScope::All, 10);
        query.filter.start_at = Some(event.created_at + Duration::seconds(1));
        assert!(query.is_past_range(&event));

        query.order = Order::Asc;
        assert!(!query.is_past_range(&event));
        query.filter.end_at = Some(event.created_at);
        assert!(query.is_past_range(&event));
    }
}
