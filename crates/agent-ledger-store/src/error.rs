//! Error types for ledger storage.

use agent_ledger_core::LedgerError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Another writer holds a lock on the record; the transaction can be retried.
    #[error("write conflict: {0}")]
    Busy(String),

    /// An event with the same idempotency key already exists.
    #[error("duplicate upstream transaction: {upstream_tx_id}")]
    DuplicateUpstreamTx {
        /// The idempotency key that was duplicated.
        upstream_tx_id: String,
    },

    /// A record that must be unique already exists.
    #[error("duplicate record: {0}")]
    Duplicate(String),
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Database(msg) | StoreError::Duplicate(msg) => Self::Storage(msg),
            StoreError::Serialization(msg) => Self::Serialization(msg),
            StoreError::Busy(msg) => Self::Busy(msg),
            StoreError::DuplicateUpstreamTx { upstream_tx_id } => {
                Self::Conflict { upstream_tx_id }
            }
        }
    }
}
