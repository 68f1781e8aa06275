//! Fee splitting for paid agent actions.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::amount::round_amount;
use crate::error::{LedgerError, Result};
use crate::ids::OwnerId;

/// A referrer taking a share of a spend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferrerShare {
    /// User receiving the referrer fee.
    pub owner_id: OwnerId,
    /// Share of the cost, in `[0, 1]`.
    pub rate: Decimal,
}

/// How the cost of one action is shared between the platform, the agent owner and an
/// optional referrer. Whatever is left after the fees is the platform's base amount.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeeSplitPolicy {
    /// Platform fee share.
    #[serde(default)]
    pub platform_rate: Decimal,

    /// Agent owner fee share.
    #[serde(default)]
    pub agent_rate: Decimal,

    /// Referrer, if the spender was referred.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<ReferrerShare>,
}

impl FeeSplitPolicy {
    /// Check that every rate is in `[0, 1]` and the rates sum to at most 1.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` describing the offending rate.
    pub fn validate(&self) -> Result<()> {
        let referrer_rate = self.referrer_rate();
        for (name, rate) in [
            ("platform_rate", self.platform_rate),
            ("agent_rate", self.agent_rate),
            ("referrer_rate", referrer_rate),
        ] {
            if rate < Decimal::ZERO || rate > Decimal::ONE {
                return Err(LedgerError::invalid(format!(
                    "{name} must be between 0 and 1, got {rate}"
                )));
            }
        }
        if self.platform_rate + self.agent_rate + referrer_rate > Decimal::ONE {
            return Err(LedgerError::invalid("fee rates must not sum above 1"));
        }
        Ok(())
    }

    fn referrer_rate(&self) -> Decimal {
        self.referrer.as_ref().map_or(Decimal::ZERO, |r| r.rate)
    }

    /// Split `total` according to the policy.
    ///
    /// Each fee is rounded to the ledger scale half-up; the base amount takes the
    /// remainder so the parts always sum to `total` exactly.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the policy is invalid.
    pub fn split(&self, total: Decimal) -> Result<FeeSplit> {
        self.validate()?;

        let platform = round_amount(total * self.platform_rate);
        let agent = round_amount(total * self.agent_rate);
        let referrer = round_amount(total * self.referrer_rate());
        let base = total - platform - agent - referrer;
        if base < Decimal::ZERO {
            // Only reachable through rounding when the rates sum to exactly 1.
            return Err(LedgerError::invalid(format!(
                "fees exceed cost {total} after rounding"
            )));
        }

        Ok(FeeSplit {
            total,
            base,
            platform,
            agent,
            referrer,
        })
    }
}

/// Result of applying a [`FeeSplitPolicy`] to an amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeeSplit {
    /// Gross amount.
    pub total: Decimal,
    /// Platform consumption portion.
    pub base: Decimal,
    /// Platform fee.
    pub platform: Decimal,
    /// Agent owner fee.
    pub agent: Decimal,
    /// Referrer fee.
    pub referrer: Decimal,
}
