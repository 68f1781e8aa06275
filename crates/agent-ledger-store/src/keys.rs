//! Key encoding utilities for `RocksDB`.
//!
//! Ids are stored as their 16 byte big-endian ULID form, so byte order is creation order
//! and index keys of the form `prefix || id` sort by time within the prefix.

use agent_ledger_core::{AccountId, AgentId, EventId, Owner, RefillEpoch, TransactionId};

/// Length of an encoded ULID.
pub const ID_LEN: usize = 16;

/// Create an account key from an account ID.
#[must_use]
pub fn account_key(id: &AccountId) -> Vec<u8> {
    id.to_bytes().to_vec()
}

/// Create an owner index key.
///
/// Format: `owner_type tag (1 byte) || owner_id`
#[must_use]
pub fn owner_key(owner: &Owner) -> Vec<u8> {
    let id = owner.owner_id.as_str().as_bytes();
    let mut key = Vec::with_capacity(1 + id.len());
    key.push(owner.owner_type.tag());
    key.extend_from_slice(id);
    key
}

/// Create an event key from an event ID.
#[must_use]
pub fn event_key(id: &EventId) -> Vec<u8> {
    id.to_bytes().to_vec()
}

/// Create an idempotency index key.
#[must_use]
pub fn upstream_key(upstream_tx_id: &str) -> Vec<u8> {
    upstream_tx_id.as_bytes().to_vec()
}

/// Prefix of an account's event index entries.
#[must_use]
pub fn account_prefix(account_id: &AccountId) -> Vec<u8> {
    account_id.to_bytes().to_vec()
}

/// Create an account-event index key.
///
/// Format: `account_id (16 bytes) || event_id (16 bytes)`
#[must_use]
pub fn account_event_key(account_id: &AccountId, event_id: &EventId) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 * ID_LEN);
    key.extend_from_slice(&account_id.to_bytes());
    key.extend_from_slice(&event_id.to_bytes());
    key
}

/// Prefix of an agent's event index entries.
///
/// Agent ids never contain NUL, so the separator keeps `a` from matching `ab`.
#[must_use]
pub fn agent_prefix(agent_id: &AgentId) -> Vec<u8> {
    let id = agent_id.as_str().as_bytes();
    let mut key = Vec::with_capacity(id.len() + 1);
    key.extend_from_slice(id);
    key.push(0);
    key
}

/// Create an agent-event index key.
///
/// Format: `agent_id || 0x00 || event_id (16 bytes)`
#[must_use]
pub fn agent_event_key(agent_id: &AgentId, event_id: &EventId) -> Vec<u8> {
    let mut key = agent_prefix(agent_id);
    key.extend_from_slice(&event_id.to_bytes());
    key
}

/// Create a transaction key from a transaction ID.
#[must_use]
pub fn transaction_key(id: &TransactionId) -> Vec<u8> {
    id.to_bytes().to_vec()
}

/// Create an account-transaction index key.
///
/// Format: `account_id (16 bytes) || transaction_id (16 bytes)`
#[must_use]
pub fn account_transaction_key(account_id: &AccountId, tx_id: &TransactionId) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 * ID_LEN);
    key.extend_from_slice(&account_id.to_bytes());
    key.extend_from_slice(&tx_id.to_bytes());
    key
}

/// Create an event-transaction index key.
///
/// Format: `event_id (16 bytes) || transaction_id (16 bytes)`
#[must_use]
pub fn event_transaction_key(event_id: &EventId, tx_id: &TransactionId) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 * ID_LEN);
    key.extend_from_slice(&event_id.to_bytes());
    key.extend_from_slice(&tx_id.to_bytes());
    key
}

/// Create a refill claim key.
///
/// Format: `account_id (16 bytes) || epoch (4 bytes, big-endian)`
#[must_use]
pub fn refill_epoch_key(account_id: &AccountId, epoch: RefillEpoch) -> Vec<u8> {
    let mut key = Vec::with_capacity(ID_LEN + 4);
    key.extend_from_slice(&account_id.to_bytes());
    key.extend_from_slice(&epoch.to_bytes());
    key
}

/// Create a task watermark key.
#[must_use]
pub fn watermark_key(task: &str) -> Vec<u8> {
    task.as_bytes().to_vec()
}

/// Extract the trailing 16 byte id of an index key.
///
/// Returns `None` if the key is shorter than an id.
#[must_use]
pub fn trailing_id(key: &[u8]) -> Option<[u8; ID_LEN]> {
    let start = key.len().checked_sub(ID_LEN)?;
    key[start..].try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_ledger_core::{OwnerId, OwnerType};

    #[test]
    fn account_event_key_format() {
        let account_id = AccountId::generate();
        let event_id = EventId::generate();
        let key = account_event_key(&account_id, &event_id);

        assert_eq!(key.len(), 32);
        assert!(key.starts_with(&account_prefix(&account_id)));
        assert_eq!(trailing_id(&key), Some(event_id.to_bytes()));
    }

    #[test]
    fn agent_prefix_is_not_ambiguous() {
        let short = AgentId::new("a").unwrap();
        let long = AgentId::new("ab").unwrap();
        let key = agent_event_key(&long, &EventId::generate());
        assert!(!key.starts_with(&agent_prefix(&short)));
        assert!(key.starts_with(&agent_prefix(&long)));
    }

    #[test]
    fn owner_key_separates_types() {
        let id = OwnerId::new("x").unwrap();
        let user = owner_key(&Owner::new(OwnerType::User, id.clone()));
        let agent = owner_key(&Owner::new(OwnerType::Agent, id));
        assert_ne!(user, agent);
    }

    #[test]
    fn index_keys_sort_by_time() {
        let account_id = AccountId::generate();
        let first = TransactionId::generate();
        let second = TransactionId::generate();
        assert!(
            account_transaction_key(&account_id, &first)
                < account_transaction_key(&account_id, &second)
        );
    }

    #[test]
    fn short_key_has_no_id() {
        assert_eq!(trailing_id(&[1, 2, 3]), None);
    }
}
