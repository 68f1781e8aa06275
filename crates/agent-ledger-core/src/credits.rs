//! Ledger postings.
//!
//! Every balance change of every account is one [`CreditTransaction`] tied to exactly one
//! event. The signed amounts of an event's transactions always sum to zero.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::account::CreditType;
use crate::error::{LedgerError, Result};
use crate::ids::{AccountId, EventId, TransactionId};

/// Side of a posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditDebit {
    /// Adds to the account.
    Credit,
    /// Removes from the account.
    Debit,
}

impl FromStr for CreditDebit {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "credit" => Ok(Self::Credit),
            "debit" => Ok(Self::Debit),
            other => Err(LedgerError::invalid(format!("unknown credit_debit: {other}"))),
        }
    }
}

/// Business meaning of a posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Purchased credits.
    Topup,
    /// Generic reward.
    Reward,
    /// Platform event reward.
    EventReward,
    /// Recharge bonus.
    RechargeBonus,
    /// Hourly free credit refill.
    Refill,
    /// Issuer side of minted credits.
    Issue,
    /// Spender side of an agent action.
    Spend,
    /// Base amount received by the platform.
    ReceiveBaseAmount,
    /// Platform fee received.
    ReceiveFeePlatform,
    /// Agent owner fee received.
    ReceiveFeeAgent,
    /// Referrer fee received.
    ReceiveFeeReferrer,
    /// Refund.
    Refund,
}

impl TransactionType {
    /// Stable string form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Topup => "topup",
            Self::Reward => "reward",
            Self::EventReward => "event_reward",
            Self::RechargeBonus => "recharge_bonus",
            Self::Refill => "refill",
            Self::Issue => "issue",
            Self::Spend => "spend",
            Self::ReceiveBaseAmount => "receive_base_amount",
            Self::ReceiveFeePlatform => "receive_fee_platform",
            Self::ReceiveFeeAgent => "receive_fee_agent",
            Self::ReceiveFeeReferrer => "receive_fee_referrer",
            Self::Refund => "refund",
        }
    }

    /// Whether postings of this type count as fee income.
    #[must_use]
    pub const fn is_fee(&self) -> bool {
        matches!(
            self,
            Self::ReceiveFeePlatform | Self::ReceiveFeeAgent | Self::ReceiveFeeReferrer
        )
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "topup" => Self::Topup,
            "reward" => Self::Reward,
            "event_reward" => Self::EventReward,
            "recharge_bonus" => Self::RechargeBonus,
            "refill" => Self::Refill,
            "issue" => Self::Issue,
            "spend" => Self::Spend,
            "receive_base_amount" => Self::ReceiveBaseAmount,
            "receive_fee_platform" => Self::ReceiveFeePlatform,
            "receive_fee_agent" => Self::ReceiveFeeAgent,
            "receive_fee_referrer" => Self::ReceiveFeeReferrer,
            "refund" => Self::Refund,
            other => {
                return Err(LedgerError::invalid(format!(
                    "unknown transaction type: {other}"
                )))
            }
        })
    }
}

/// One posting against one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditTransaction {
    /// Time-ordered identifier.
    pub id: TransactionId,

    /// The account posted to.
    pub account_id: AccountId,

    /// The event this posting belongs to.
    pub event_id: EventId,

    /// Credit or debit.
    pub credit_debit: CreditDebit,

    /// Business meaning.
    pub tx_type: TransactionType,

    /// Pool touched; `None` for issuer legs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credit_type: Option<CreditType>,

    /// Always positive; the side is given by `credit_debit`.
    pub amount: Decimal,

    /// When the posting was written.
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    /// A credit posting.
    #[must_use]
    pub fn credit(
        account_id: AccountId,
        event_id: EventId,
        tx_type: TransactionType,
        credit_type: Option<CreditType>,
        amount: Decimal,
    ) -> Self {
        Self::new(account_id, event_id, CreditDebit::Credit, tx_type, credit_type, amount)
    }

    /// A debit posting.
    #[must_use]
    pub fn debit(
        account_id: AccountId,
        event_id: EventId,
        tx_type: TransactionType,
        credit_type: Option<CreditType>,
        amount: Decimal,
    ) -> Self {
        Self::new(account_id, event_id, CreditDebit::Debit, tx_type, credit_type, amount)
    }

    fn new(
        account_id: AccountId,
        event_id: EventId,
        credit_debit: CreditDebit,
        tx_type: TransactionType,
        credit_type: Option<CreditType>,
        amount: Decimal,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            account_id,
            event_id,
            credit_debit,
            tx_type,
            credit_type,
            amount,
            created_at: Utc::now(),
        }
    }

    /// Amount with sign: positive for credits, negative for debits.
    #[must_use]
    pub fn signed_amount(&self) -> Decimal {
        match self.credit_debit {
            CreditDebit::Credit => self.amount,
            CreditDebit::Debit => -self.amount,
        }
    }
}

/// Check the double-entry invariant for the postings of one event.
///
/// # Errors
///
/// Returns `Invariant` if a posting belongs to another event, is not positive, or the
/// signed amounts do not sum to zero.
pub fn check_balanced(event_id: EventId, transactions: &[CreditTransaction]) -> Result<()> {
    let mut sum = Decimal::ZERO;
    for tx in transactions {
        if tx.event_id != event_id {
            return Err(LedgerError::Invariant(format!(
                "transaction {} belongs to event {}, not {event_id}",
                tx.id, tx.event_id
            )));
        }
        if tx.amount <= Decimal::ZERO {
            return Err(LedgerError::Invariant(format!(
                "transaction {} has non-positive amount {}",
                tx.id, tx.amount
            )));
        }
        sum += tx.signed_amount();
    }
    if sum != Decimal::ZERO {
        return Err(LedgerError::Invariant(format!(
            "postings of event {event_id} sum to {sum}"
        )));
    }
    Ok(())
}
