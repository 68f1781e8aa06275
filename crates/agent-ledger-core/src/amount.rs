//! Decimal amount helpers.
//!
//! Amounts are fixed-point decimals with at most [`AMOUNT_SCALE`] fractional digits and
//! no larger than [`MAX_AMOUNT`].

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{LedgerError, Result};

/// Number of fractional digits kept for every stored amount.
pub const AMOUNT_SCALE: u32 = 4;

/// Largest amount accepted from a caller: one trillion credits.
///
/// Balances and running totals are summed with checked arithmetic, so an account that
/// reaches the decimal range is rejected instead of wrapping.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0xD4A5_1000, 0xE8, 0, false, 0);

/// Round half-up to the ledger scale.
///
/// `MidpointAwayFromZero` is half-up for the non-negative values the ledger handles.
#[must_use]
pub fn round_amount(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Validate a caller-supplied amount that must be strictly positive.
///
/// # Errors
///
/// Returns `InvalidArgument` if the amount is not positive, exceeds [`MAX_AMOUNT`] or has
/// too many decimals.
pub fn require_positive(field: &str, amount: Decimal) -> Result<Decimal> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::invalid(format!("{field} must be greater than 0")));
    }
    require_in_range(field, amount)
}

/// Validate a caller-supplied amount that may be zero.
///
/// # Errors
///
/// Returns `InvalidArgument` if the amount is negative, exceeds [`MAX_AMOUNT`] or has too
/// many decimals.
pub fn require_non_negative(field: &str, amount: Decimal) -> Result<Decimal> {
    if amount < Decimal::ZERO {
        return Err(LedgerError::invalid(format!("{field} must not be negative")));
    }
    require_in_range(field, amount)
}

/// Add two amounts, failing instead of overflowing.
///
/// # Errors
///
/// Returns `InvalidArgument` if the sum is outside the decimal range.
pub fn checked_sum(a: Decimal, b: Decimal) -> Result<Decimal> {
    a.checked_add(b)
        .ok_or_else(|| LedgerError::invalid("amount overflows the account balance"))
}

fn require_in_range(field: &str, amount: Decimal) -> Result<Decimal> {
    if amount > MAX_AMOUNT {
        return Err(LedgerError::invalid(format!(
            "{field} must not exceed {MAX_AMOUNT}"
        )));
    }
    if amount.normalize().scale() > AMOUNT_SCALE {
        return Err(LedgerError::invalid(format!(
            "{field} supports at most {AMOUNT_SCALE} decimal places"
        )));
    }
    Ok(amount)
}
