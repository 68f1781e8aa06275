//! Credit account types.
//!
//! An account belongs to one owner and holds three independently tracked credit pools.
//! Spending always drains them in the same order: free credits first (they refill),
//! then reward credits, then purchased credits.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::amount::checked_sum;
use crate::error::{LedgerError, Result};
use crate::ids::{AccountId, OwnerId};
use crate::quota::RefillEpoch;

/// Kind of entity owning an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerType {
    /// An end user.
    User,
    /// An agent hosted on the platform.
    Agent,
    /// A company or team.
    Company,
    /// Internal platform accounts (issuers and fee receivers).
    Platform,
}

impl OwnerType {
    /// Stable string form, also used in storage keys.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
            Self::Company => "company",
            Self::Platform => "platform",
        }
    }

    /// Single byte tag used in storage keys.
    #[must_use]
    pub const fn tag(&self) -> u8 {
        match self {
            Self::User => 1,
            Self::Agent => 2,
            Self::Company => 3,
            Self::Platform => 4,
        }
    }
}

impl fmt::Display for OwnerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OwnerType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Self::User),
            "agent" => Ok(Self::Agent),
            "company" => Ok(Self::Company),
            "platform" => Ok(Self::Platform),
            other => Err(LedgerError::invalid(format!("unknown owner type: {other}"))),
        }
    }
}

/// Owner of an account: the natural key of the accounts table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Owner {
    /// Owner kind.
    pub owner_type: OwnerType,
    /// Owner identifier.
    pub owner_id: OwnerId,
}

impl Owner {
    /// Create an owner reference.
    #[must_use]
    pub const fn new(owner_type: OwnerType, owner_id: OwnerId) -> Self {
        Self {
            owner_type,
            owner_id,
        }
    }

    /// A user owner.
    #[must_use]
    pub const fn user(owner_id: OwnerId) -> Self {
        Self::new(OwnerType::User, owner_id)
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.owner_type, self.owner_id)
    }
}

/// Well-known internal platform accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformAccount {
    /// Counter-party of every recharge.
    Recharge,
    /// Counter-party of every reward.
    Reward,
    /// Counter-party of every quota refill.
    Refill,
    /// Receives the base amount of every spend.
    Consumption,
    /// Receives the platform fee of every spend.
    Fee,
}

impl PlatformAccount {
    /// Owner id of the platform account.
    #[must_use]
    pub const fn id(&self) -> &'static str {
        match self {
            Self::Recharge => "platform_recharge",
            Self::Reward => "platform_reward",
            Self::Refill => "platform_refill",
            Self::Consumption => "platform_consumption",
            Self::Fee => "platform_fee",
        }
    }

    /// Owner reference of the platform account.
    #[must_use]
    pub fn owner(&self) -> Owner {
        Owner::new(OwnerType::Platform, OwnerId::from_static(self.id()))
    }

    /// Issuer accounts mint credits: their debit legs never draw a pool.
    #[must_use]
    pub const fn is_issuer(&self) -> bool {
        matches!(self, Self::Recharge | Self::Reward | Self::Refill)
    }
}

/// One of the three credit pools of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditType {
    /// Quota-based free credits, refilled hourly.
    Free,
    /// Reward credits.
    Reward,
    /// Purchased credits.
    Permanent,
}

/// A credit account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Surrogate identifier.
    pub id: AccountId,

    /// Owner kind.
    pub owner_type: OwnerType,

    /// Owner identifier; unique together with `owner_type`.
    pub owner_id: OwnerId,

    /// Daily free quota: the ceiling of `free_credits` for refills.
    pub free_quota: Decimal,

    /// Amount added to `free_credits` on every hourly refill.
    pub refill_amount: Decimal,

    /// Free credit pool.
    pub free_credits: Decimal,

    /// Reward credit pool.
    pub reward_credits: Decimal,

    /// Purchased credit pool.
    pub credits: Decimal,

    /// Lifetime credits received.
    pub total_income: Decimal,

    /// Lifetime credits spent or issued.
    pub total_expense: Decimal,

    /// Lifetime fee income (subset of `total_income`).
    pub total_fee_income: Decimal,

    /// Most recent refill epoch applied to this account.
    pub last_refill_epoch: Option<RefillEpoch>,

    /// When the account was created.
    pub created_at: DateTime<Utc>,

    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new account with empty pools and no quota.
    #[must_use]
    pub fn new(owner: Owner) -> Self {
        let now = Utc::now();
        Self {
            id: AccountId::generate(),
            owner_type: owner.owner_type,
            owner_id: owner.owner_id,
            free_quota: Decimal::ZERO,
            refill_amount: Decimal::ZERO,
            free_credits: Decimal::ZERO,
            reward_credits: Decimal::ZERO,
            credits: Decimal::ZERO,
            total_income: Decimal::ZERO,
            total_expense: Decimal::ZERO,
            total_fee_income: Decimal::ZERO,
            last_refill_epoch: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the daily quota and start with a full free pool.
    #[must_use]
    pub fn with_quota(mut self, free_quota: Decimal, refill_amount: Decimal) -> Self {
        self.free_quota = free_quota;
        self.refill_amount = refill_amount.min(free_quota);
        self.free_credits = free_quota;
        self
    }

    /// The owner reference of this account.
    #[must_use]
    pub fn owner(&self) -> Owner {
        Owner::new(self.owner_type, self.owner_id.clone())
    }

    /// Total spendable balance across all pools, saturating at the decimal range.
    #[must_use]
    pub fn total_balance(&self) -> Decimal {
        self.free_credits
            .saturating_add(self.reward_credits)
            .saturating_add(self.credits)
    }

    /// Whether this is one of the platform issuer accounts.
    #[must_use]
    pub fn is_issuer(&self) -> bool {
        self.owner_type == OwnerType::Platform
            && [
                PlatformAccount::Recharge,
                PlatformAccount::Reward,
                PlatformAccount::Refill,
            ]
            .iter()
            .any(|p| p.id() == self.owner_id.as_str())
    }

    /// Check if the pools can cover `amount`.
    #[must_use]
    pub fn has_sufficient_credits(&self, amount: Decimal) -> bool {
        self.total_balance() >= amount
    }

    /// Work out how a debit of `amount` is spread over the pools without touching them.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientBalance` when the pools together cannot cover `amount`.
    pub fn plan_debit(&self, amount: Decimal) -> Result<PoolSplit> {
        let available = self.total_balance();
        if amount > available {
            return Err(LedgerError::InsufficientBalance {
                available,
                required: amount,
            });
        }

        let free = amount.min(self.free_credits.max(Decimal::ZERO));
        let mut remaining = amount - free;
        let reward = remaining.min(self.reward_credits.max(Decimal::ZERO));
        remaining -= reward;

        Ok(PoolSplit {
            free,
            reward,
            permanent: remaining,
        })
    }

    /// Apply a debit previously planned by [`Account::plan_debit`].
    ///
    /// # Errors
    ///
    /// Returns `Invariant` if the split would drive a pool negative, and `InvalidArgument`
    /// if the expense total would overflow.
    pub fn apply_debit(&mut self, split: &PoolSplit) -> Result<()> {
        if split.free > self.free_credits
            || split.reward > self.reward_credits
            || split.permanent > self.credits
        {
            return Err(LedgerError::Invariant(format!(
                "debit {split:?} exceeds pools of account {}",
                self.id
            )));
        }
        let total_expense = checked_sum(self.total_expense, split.total())?;
        self.free_credits -= split.free;
        self.reward_credits -= split.reward;
        self.credits -= split.permanent;
        self.total_expense = total_expense;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Credit one pool.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the pool or the income total would overflow; the
    /// account is left unchanged.
    pub fn credit(&mut self, pool: CreditType, amount: Decimal) -> Result<()> {
        let balance = match pool {
            CreditType::Free => &mut self.free_credits,
            CreditType::Reward => &mut self.reward_credits,
            CreditType::Permanent => &mut self.credits,
        };
        let new_balance = checked_sum(*balance, amount)?;
        let total_income = checked_sum(self.total_income, amount)?;
        *balance = new_balance;
        self.total_income = total_income;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record credits minted by an issuer account.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the issued total would overflow.
    pub fn record_issue(&mut self, amount: Decimal) -> Result<()> {
        self.total_expense = checked_sum(self.total_expense, amount)?;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// How a debit is spread over the three pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolSplit {
    /// Drawn from free credits.
    pub free: Decimal,
    /// Drawn from reward credits.
    pub reward: Decimal,
    /// Drawn from purchased credits.
    pub permanent: Decimal,
}

impl PoolSplit {
    /// Sum of all portions.
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.free + self.reward + self.permanent
    }

    /// Portion not paid from the refillable free pool.
    #[must_use]
    pub fn permanent_amount(&self) -> Decimal {
        self.reward + self.permanent
    }

    /// Non-zero portions in spend order.
    #[must_use]
    pub fn portions(&self) -> Vec<(CreditType, Decimal)> {
        [
            (CreditType::Free, self.free),
            (CreditType::Reward, self.reward),
            (CreditType::Permanent, self.permanent),
        ]
        .into_iter()
        .filter(|(_, amount)| *amount > Decimal::ZERO)
        .collect()
    }
}

/// Check a caller-supplied owner against the stored owner of an account.
///
/// `None` means the caller did not ask for an ownership check.
///
/// # Errors
///
/// Returns `Forbidden` when `claimed` is set and is not the user owning `account`.
pub fn authorize(claimed: Option<&OwnerId>, account: &Account) -> Result<()> {
    match claimed {
        None => Ok(()),
        Some(owner) if account.owner_type == OwnerType::User && &account.owner_id == owner => {
            Ok(())
        }
        Some(owner) => Err(LedgerError::Forbidden(format!(
            "account {} does not belong to user {owner}",
            account.id
        ))),
    }
}
