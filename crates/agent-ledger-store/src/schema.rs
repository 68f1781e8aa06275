//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Primary account records, keyed by `account_id` (ULID).
    pub const ACCOUNTS: &str = "accounts";

    /// Unique index: owner to account, keyed by `owner_type tag || owner_id`.
    /// Value is the 16 byte account id.
    pub const ACCOUNTS_BY_OWNER: &str = "accounts_by_owner";

    /// Credit events, keyed by `event_id` (ULID).
    pub const EVENTS: &str = "events";

    /// Unique index: idempotency key to event, keyed by `upstream_tx_id`.
    /// Value is the 16 byte event id.
    pub const EVENTS_BY_UPSTREAM: &str = "events_by_upstream";

    /// Index: events by account, keyed by `account_id || event_id`.
    /// Value is empty (index only).
    pub const EVENTS_BY_ACCOUNT: &str = "events_by_account";

    /// Index: events by agent, keyed by `agent_id || 0x00 || event_id`.
    /// Value is empty (index only).
    pub const EVENTS_BY_AGENT: &str = "events_by_agent";

    /// Ledger postings, keyed by `transaction_id` (ULID).
    pub const TRANSACTIONS: &str = "transactions";

    /// Index: postings by account, keyed by `account_id || transaction_id`.
    /// Value is empty (index only).
    pub const TRANSACTIONS_BY_ACCOUNT: &str = "transactions_by_account";

    /// Index: postings by event, keyed by `event_id || transaction_id`.
    /// Value is empty (index only).
    pub const TRANSACTIONS_BY_EVENT: &str = "transactions_by_event";

    /// Claimed refill epochs, keyed by `account_id || epoch`.
    pub const REFILL_EPOCHS: &str = "refill_epochs";

    /// Background task watermarks, keyed by task name.
    pub const TASK_WATERMARKS: &str = "task_watermarks";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::ACCOUNTS,
        cf::ACCOUNTS_BY_OWNER,
        cf::EVENTS,
        cf::EVENTS_BY_UPSTREAM,
        cf::EVENTS_BY_ACCOUNT,
        cf::EVENTS_BY_AGENT,
        cf::TRANSACTIONS,
        cf::TRANSACTIONS_BY_ACCOUNT,
        cf::TRANSACTIONS_BY_EVENT,
        cf::REFILL_EPOCHS,
        cf::TASK_WATERMARKS,
    ]
}
