//! Error types for the credit ledger.

use rust_decimal::Decimal;

use crate::ids::IdError;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors that can occur in ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// A referenced account or event does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record that was looked up.
        entity: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// The caller-supplied owner does not own the target resource.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Missing or inconsistent arguments.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The three credit pools together cannot cover the requested amount.
    #[error("insufficient balance: available={available}, required={required}")]
    InsufficientBalance {
        /// Sum of all pools at the time of the check.
        available: Decimal,
        /// Amount requested.
        required: Decimal,
    },

    /// The idempotency key was already used by another event.
    #[error("upstream transaction already applied: {upstream_tx_id}")]
    Conflict {
        /// The duplicated idempotency key.
        upstream_tx_id: String,
    },

    /// A per-user skill rate limit was exceeded.
    #[error("rate limit exceeded for {key}")]
    RateLimited {
        /// The rate limit key (skill name or category).
        key: String,
    },

    /// The storage layer reported a write conflict; the operation may be retried.
    #[error("storage busy: {0}")]
    Busy(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A ledger invariant was violated while building postings.
    #[error("ledger invariant violated: {0}")]
    Invariant(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}

impl LedgerError {
    /// Shorthand for a `NotFound` error.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Shorthand for an `InvalidArgument` error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Whether retrying the whole operation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy(_))
    }
}
