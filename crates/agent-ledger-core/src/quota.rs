//! Daily free quota and hourly refills.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Timelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::account::Account;
use crate::amount::{require_non_negative, require_positive};
use crate::error::{LedgerError, Result};

/// Quota given to new user accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QuotaDefaults {
    /// Daily free quota.
    pub free_quota: Decimal,
    /// Hourly refill amount.
    pub refill_amount: Decimal,
}

impl QuotaDefaults {
    /// Validate the defaults with the same rules as a quota update.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if an amount is negative or the refill exceeds the quota.
    pub fn validate(&self) -> Result<()> {
        require_non_negative("free_quota", self.free_quota)?;
        require_non_negative("refill_amount", self.refill_amount)?;
        if self.refill_amount > self.free_quota {
            return Err(LedgerError::invalid(
                "refill_amount must not exceed free_quota",
            ));
        }
        Ok(())
    }
}

/// A change of an account's daily quota configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QuotaUpdate {
    /// New daily quota.
    pub free_quota: Option<Decimal>,
    /// New hourly refill amount.
    pub refill_amount: Option<Decimal>,
}

impl QuotaUpdate {
    /// Check the update on its own, before any account is loaded.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when neither value is given or a value is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.free_quota.is_none() && self.refill_amount.is_none() {
            return Err(LedgerError::invalid(
                "at least one of free_quota or refill_amount must be provided",
            ));
        }
        if let Some(free_quota) = self.free_quota {
            require_positive("free_quota", free_quota)?;
        }
        if let Some(refill_amount) = self.refill_amount {
            require_non_negative("refill_amount", refill_amount)?;
        }
        Ok(())
    }

    /// Apply the update to an account and return the audit metadata.
    ///
    /// The account is left untouched when the resulting configuration is invalid.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the update is invalid or the resulting
    /// `refill_amount` exceeds the resulting `free_quota`.
    pub fn apply(&self, account: &mut Account) -> Result<serde_json::Value> {
        self.validate()?;

        let free_quota = self.free_quota.unwrap_or(account.free_quota);
        let refill_amount = self.refill_amount.unwrap_or(account.refill_amount);
        if refill_amount > free_quota {
            return Err(LedgerError::invalid(format!(
                "refill_amount {refill_amount} must not exceed free_quota {free_quota}"
            )));
        }

        let metadata = serde_json::json!({
            "free_quota": { "before": account.free_quota, "after": free_quota },
            "refill_amount": { "before": account.refill_amount, "after": refill_amount },
        });
        account.free_quota = free_quota;
        account.refill_amount = refill_amount;
        account.updated_at = Utc::now();
        Ok(metadata)
    }
}

/// Amount a refill would add to the free pool: the refill amount, capped so the pool
/// does not exceed the daily quota.
#[must_use]
pub fn refill_credit(account: &Account) -> Decimal {
    let headroom = (account.free_quota - account.free_credits).max(Decimal::ZERO);
    account.refill_amount.min(headroom).max(Decimal::ZERO)
}

/// UTC hour bucket in `YYYYMMDDHH` form; each account can be refilled once per epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefillEpoch(u32);

impl RefillEpoch {
    /// The epoch containing `at`.
    #[must_use]
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        let year = u32::try_from(at.year()).unwrap_or(0);
        Self(((year * 100 + at.month()) * 100 + at.day()) * 100 + at.hour())
    }

    /// The epoch containing the current time.
    #[must_use]
    pub fn current() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Numeric `YYYYMMDDHH` value.
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }

    /// Big-endian bytes, ordered like the epochs themselves.
    #[must_use]
    pub const fn to_bytes(&self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for RefillEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:010}", self.0)
    }
}

impl FromStr for RefillEpoch {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || LedgerError::invalid(format!("invalid refill epoch: {s}"));
        if s.len() != 10 {
            return Err(invalid());
        }
        let value: u32 = s.parse().map_err(|_| invalid())?;
        let hour = value % 100;
        let day = (value / 100) % 100;
        let month = (value / 10_000) % 100;
        if hour > 23 || !(1..=31).contains(&day) || !(1..=12).contains(&month) {
            return Err(invalid());
        }
        Ok(Self(value))
    }
}
