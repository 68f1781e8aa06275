//! Storage layer and ledger engine for the agent credit ledger.
//!
//! Storage is split in two traits:
//!
//! - [`Store`]: point lookups and bounded scans, safe to call concurrently with writers.
//! - [`StoreTxn`]: a unit of work. Reads inside it lock the rows they return until the
//!   transaction commits or is dropped, and all writes land atomically on
//!   [`StoreTxn::commit`]. Dropping a transaction without committing discards it.
//!
//! [`Ledger`] binds the domain rules from `agent-ledger-core` to these transactions.
//!
//! Two backends are provided:
//!
//! - [`MemoryStore`]: in-process tables behind one lock, used by tests and
//!   single-node development.
//! - `RocksStore` (feature `rocksdb-backend`): a `RocksDB` transaction database with
//!   column families for the indexes, see [`schema`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use agent_ledger_core::{Owner, OwnerId};
//! use agent_ledger_store::{Ledger, MemoryStore};
//! use rust_decimal::Decimal;
//!
//! let ledger = Ledger::new(Arc::new(MemoryStore::new()));
//! let owner = Owner::user(OwnerId::new("alice").unwrap());
//! let account = ledger
//!     .recharge(&owner, Decimal::new(100, 0), "pay_1", None)
//!     .unwrap();
//! assert_eq!(account.credits, Decimal::new(100, 0));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod ledger;
pub mod memory;
pub mod query;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use ledger::{Ledger, RefillOutcome, RefillSummary, SpendReceipt, SpendRequest, TransactionWithEvent};
pub use memory::MemoryStore;
pub use query::{EventFilter, EventQuery, EventScope, TaskWatermark, TransactionQuery};
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use agent_ledger_core::{
    Account, AccountId, CreditEvent, CreditTransaction, EventId, Owner, RefillEpoch,
};

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (e.g., `RocksDB`, in-memory for testing).
pub trait Store: Send + Sync {
    /// Start a unit of work.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot start a transaction.
    fn begin(&self) -> Result<Box<dyn StoreTxn + '_>>;

    // =========================================================================
    // Account Operations
    // =========================================================================

    /// Get an account by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_account(&self, id: &AccountId) -> Result<Option<Account>>;

    /// Get an account by owner.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_account(&self, owner: &Owner) -> Result<Option<Account>>;

    /// IDs of all accounts with a positive refill amount.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn refillable_accounts(&self) -> Result<Vec<AccountId>>;

    // =========================================================================
    // Event Operations
    // =========================================================================

    /// Get an event by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_event(&self, id: &EventId) -> Result<Option<CreditEvent>>;

    /// Get an event by its idempotency key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_event_by_upstream_tx_id(&self, upstream_tx_id: &str) -> Result<Option<CreditEvent>>;

    /// Get several events at once; missing ids are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_events(&self, ids: &[EventId]) -> Result<Vec<CreditEvent>>;

    /// Walk events in id order, returning at most `query.limit` matches.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn scan_events(&self, query: &EventQuery) -> Result<Vec<CreditEvent>>;

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    /// All postings of one event.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_event_transactions(&self, event_id: &EventId) -> Result<Vec<CreditTransaction>>;

    /// Walk one account's postings newest first, returning at most `query.limit` matches.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn scan_transactions(&self, query: &TransactionQuery) -> Result<Vec<CreditTransaction>>;

    // =========================================================================
    // Task Watermarks
    // =========================================================================

    /// Get the last completed run of a background task.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_task_watermark(&self, task: &str) -> Result<Option<TaskWatermark>>;

    /// Record a completed run of a background task.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_task_watermark(&self, watermark: &TaskWatermark) -> Result<()>;
}

/// A unit of work against a [`Store`].
///
/// Reads lock the returned rows for the lifetime of the transaction. Writes become
/// visible to other readers only after [`StoreTxn::commit`].
pub trait StoreTxn {
    /// Read and lock an account by ID.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Busy` if the lock cannot be taken.
    fn account(&mut self, id: &AccountId) -> Result<Option<Account>>;

    /// Read and lock an account by owner.
    ///
    /// The owner slot is locked even when no account exists yet, so concurrent creators
    /// of the same owner serialize.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Busy` if the lock cannot be taken.
    fn account_by_owner(&mut self, owner: &Owner) -> Result<Option<Account>>;

    /// Read and lock an event by ID.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Busy` if the lock cannot be taken.
    fn event(&mut self, id: &EventId) -> Result<Option<CreditEvent>>;

    /// Read and lock the idempotency slot of `upstream_tx_id`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Busy` if the lock cannot be taken.
    fn event_by_upstream_tx_id(&mut self, upstream_tx_id: &str) -> Result<Option<CreditEvent>>;

    /// Insert or update an account, maintaining the owner index.
    ///
    /// # Errors
    ///
    /// Returns an error if the write cannot be staged.
    fn put_account(&mut self, account: &Account) -> Result<()>;

    /// Insert a new event and its indexes.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DuplicateUpstreamTx` if another event already holds the
    /// idempotency key.
    fn insert_event(&mut self, event: &CreditEvent) -> Result<()>;

    /// Overwrite an existing event. Only the note may differ from the stored record.
    ///
    /// # Errors
    ///
    /// Returns an error if the write cannot be staged.
    fn update_event(&mut self, event: &CreditEvent) -> Result<()>;

    /// Insert a posting and its indexes.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Duplicate` if the transaction id already exists.
    fn insert_transaction(&mut self, transaction: &CreditTransaction) -> Result<()>;

    /// Claim a refill epoch for an account.
    ///
    /// Returns `false` if the epoch was already claimed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Busy` if the claim cannot be locked.
    fn claim_refill_epoch(&mut self, account_id: &AccountId, epoch: RefillEpoch) -> Result<bool>;

    /// Apply every staged write atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the commit; nothing is applied.
    fn commit(self: Box<Self>) -> Result<()>;
}
