//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait on top of a
//! pessimistic `TransactionDB`: locking reads take row locks that are held until the
//! transaction commits or is dropped, and a lock wait that times out surfaces as
//! [`StoreError::Busy`].

use std::path::Path;
use std::sync::Arc;

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, Direction, ErrorKind, IteratorMode, MultiThreaded,
    Options, Transaction, TransactionDB, TransactionDBOptions,
};

use agent_ledger_core::{
    Account, AccountId, CreditEvent, CreditTransaction, EventId, Order, Owner, RefillEpoch,
    TransactionId,
};

use crate::error::{Result, StoreError};
use crate::keys::{self, ID_LEN};
use crate::query::{EventQuery, EventScope, TaskWatermark, TransactionQuery};
use crate::schema::{all_column_families, cf};
use crate::{Store, StoreTxn};

/// How long a transaction waits for a row lock before giving up.
const LOCK_TIMEOUT_MS: i64 = 2_000;

type Db = TransactionDB<MultiThreaded>;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<Db>,
}

fn db_error(err: &rocksdb::Error) -> StoreError {
    match err.kind() {
        ErrorKind::Busy | ErrorKind::TimedOut | ErrorKind::TryAgain => {
            StoreError::Busy(err.to_string())
        }
        _ => StoreError::Database(err.to_string()),
    }
}

/// Serialize a value using CBOR.
fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

/// Deserialize a value from CBOR.
fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
    ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn id_bytes(raw: &[u8]) -> Result<[u8; ID_LEN]> {
    raw.try_into()
        .map_err(|_| StoreError::Serialization(format!("expected {ID_LEN} byte id, got {}", raw.len())))
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let mut txn_opts = TransactionDBOptions::default();
        txn_opts.set_txn_lock_timeout(LOCK_TIMEOUT_MS);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = Db::open_cf_descriptors(&opts, &txn_opts, path, cf_descriptors)
            .map_err(|e| db_error(&e))?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    fn get<T: serde::de::DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| db_error(&e))?
            .map(|data| deserialize(&data))
            .transpose()
    }

    /// Walk `prefix || id` keys of an index in id order, starting after `cursor`.
    ///
    /// `visit` returns `false` to stop the walk.
    fn scan_index<F>(
        &self,
        cf_name: &str,
        prefix: &[u8],
        cursor: Option<[u8; ID_LEN]>,
        order: Order,
        mut visit: F,
    ) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<bool>,
    {
        let cf = self.cf(cf_name)?;
        let start = match (order, cursor) {
            (_, Some(cursor)) => [prefix, cursor.as_slice()].concat(),
            (Order::Desc, None) => [prefix, [0xFF; ID_LEN].as_slice()].concat(),
            (Order::Asc, None) => prefix.to_vec(),
        };
        let direction = match order {
            Order::Asc => Direction::Forward,
            Order::Desc => Direction::Reverse,
        };

        for item in self
            .db
            .iterator_cf(&cf, IteratorMode::From(start.as_slice(), direction))
        {
            let (key, value) = item.map_err(|e| db_error(&e))?;
            if !key.starts_with(prefix) {
                break;
            }
            if cursor.is_some() && key.as_ref() == start.as_slice() {
                continue;
            }
            if !visit(&key, &value)? {
                break;
            }
        }
        Ok(())
    }
}

impl Store for RocksStore {
    fn begin(&self) -> Result<Box<dyn StoreTxn + '_>> {
        Ok(Box::new(RocksTxn {
            store: self,
            txn: self.db.transaction(),
        }))
    }

    // =========================================================================
    // Account Operations
    // =========================================================================

    fn get_account(&self, id: &AccountId) -> Result<Option<Account>> {
        self.get(cf::ACCOUNTS, &keys::account_key(id))
    }

    fn find_account(&self, owner: &Owner) -> Result<Option<Account>> {
        let cf = self.cf(cf::ACCOUNTS_BY_OWNER)?;
        let Some(raw) = self
            .db
            .get_cf(&cf, keys::owner_key(owner))
            .map_err(|e| db_error(&e))?
        else {
            return Ok(None);
        };
        self.get_account(&AccountId::from_bytes(id_bytes(&raw)?))
    }

    fn refillable_accounts(&self) -> Result<Vec<AccountId>> {
        let cf = self.cf(cf::ACCOUNTS)?;
        let mut ids = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| db_error(&e))?;
            let account: Account = deserialize(&value)?;
            if account.refill_amount > rust_decimal::Decimal::ZERO {
                ids.push(account.id);
            }
        }
        Ok(ids)
    }

    // =========================================================================
    // Event Operations
    // =========================================================================

    fn get_event(&self, id: &EventId) -> Result<Option<CreditEvent>> {
        self.get(cf::EVENTS, &keys::event_key(id))
    }

    fn get_event_by_upstream_tx_id(&self, upstream_tx_id: &str) -> Result<Option<CreditEvent>> {
        let cf = self.cf(cf::EVENTS_BY_UPSTREAM)?;
        let Some(raw) = self
            .db
            .get_cf(&cf, keys::upstream_key(upstream_tx_id))
            .map_err(|e| db_error(&e))?
        else {
            return Ok(None);
        };
        self.get_event(&EventId::from_bytes(id_bytes(&raw)?))
    }

    fn get_events(&self, ids: &[EventId]) -> Result<Vec<CreditEvent>> {
        let mut events = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(event) = self.get_event(id)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    fn scan_events(&self, query: &EventQuery) -> Result<Vec<CreditEvent>> {
        let mut events = Vec::new();
        if query.limit == 0 {
            return Ok(events);
        }

        let (cf_name, prefix) = match &query.scope {
            EventScope::All => (cf::EVENTS, Vec::new()),
            EventScope::Account(id) => (cf::EVENTS_BY_ACCOUNT, keys::account_prefix(id)),
            EventScope::Agent(id) => (cf::EVENTS_BY_AGENT, keys::agent_prefix(id)),
        };
        let indexed = !prefix.is_empty();

        self.scan_index(
            cf_name,
            &prefix,
            query.cursor.map(|c| c.to_bytes()),
            query.order,
            |key, value| {
                let event: CreditEvent = if indexed {
                    let id = keys::trailing_id(key)
                        .ok_or_else(|| StoreError::Serialization("short index key".into()))?;
                    match self.get_event(&EventId::from_bytes(id))? {
                        Some(event) => event,
                        None => return Ok(true),
                    }
                } else {
                    deserialize(value)?
                };

                if query.is_past_range(&event) {
                    return Ok(false);
                }
                if query.matches(&event) {
                    events.push(event);
                }
                Ok(events.len() < query.limit)
            },
        )?;
        Ok(events)
    }

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    fn get_event_transactions(&self, event_id: &EventId) -> Result<Vec<CreditTransaction>> {
        let mut transactions = Vec::new();
        self.scan_index(
            cf::TRANSACTIONS_BY_EVENT,
            &keys::event_key(event_id),
            None,
            Order::Asc,
            |key, _| {
                if let Some(id) = keys::trailing_id(key) {
                    let tx_key = keys::transaction_key(&TransactionId::from_bytes(id));
                    if let Some(tx) = self.get(cf::TRANSACTIONS, &tx_key)? {
                        transactions.push(tx);
                    }
                }
                Ok(true)
            },
        )?;
        Ok(transactions)
    }

    fn scan_transactions(&self, query: &TransactionQuery) -> Result<Vec<CreditTransaction>> {
        let mut transactions = Vec::new();
        if query.limit == 0 {
            return Ok(transactions);
        }

        self.scan_index(
            cf::TRANSACTIONS_BY_ACCOUNT,
            &keys::account_prefix(&query.account_id),
            query.cursor.map(|c| c.to_bytes()),
            Order::Desc,
            |key, _| {
                let id = keys::trailing_id(key)
                    .ok_or_else(|| StoreError::Serialization("short index key".into()))?;
                let tx_key = keys::transaction_key(&TransactionId::from_bytes(id));
                if let Some(tx) = self.get::<CreditTransaction>(cf::TRANSACTIONS, &tx_key)? {
                    if query.matches(&tx) {
                        transactions.push(tx);
                    }
                }
                Ok(transactions.len() < query.limit)
            },
        )?;
        Ok(transactions)
    }

    // =========================================================================
    // Task Watermarks
    // =========================================================================

    fn get_task_watermark(&self, task: &str) -> Result<Option<TaskWatermark>> {
        self.get(cf::TASK_WATERMARKS, &keys::watermark_key(task))
    }

    fn put_task_watermark(&self, watermark: &TaskWatermark) -> Result<()> {
        let cf = self.cf(cf::TASK_WATERMARKS)?;
        self.db
            .put_cf(&cf, keys::watermark_key(&watermark.task), serialize(watermark)?)
            .map_err(|e| db_error(&e))
    }
}

/// A pessimistic `RocksDB` transaction.
struct RocksTxn<'a> {
    store: &'a RocksStore,
    txn: Transaction<'a, Db>,
}

impl RocksTxn<'_> {
    fn get_locked(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.store.cf(cf_name)?;
        self.txn
            .get_for_update_cf(&cf, key, true)
            .map_err(|e| db_error(&e))
    }

    fn put(&self, cf_name: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let cf = self.store.cf(cf_name)?;
        self.txn.put_cf(&cf, key, value).map_err(|e| db_error(&e))
    }
}

impl StoreTxn for RocksTxn<'_> {
    fn account(&mut self, id: &AccountId) -> Result<Option<Account>> {
        self.get_locked(cf::ACCOUNTS, &keys::account_key(id))?
            .map(|data| deserialize(&data))
            .transpose()
    }

    fn account_by_owner(&mut self, owner: &Owner) -> Result<Option<Account>> {
        match self.get_locked(cf::ACCOUNTS_BY_OWNER, &keys::owner_key(owner))? {
            Some(raw) => self.account(&AccountId::from_bytes(id_bytes(&raw)?)),
            None => Ok(None),
        }
    }

    fn event(&mut self, id: &EventId) -> Result<Option<CreditEvent>> {
        self.get_locked(cf::EVENTS, &keys::event_key(id))?
            .map(|data| deserialize(&data))
            .transpose()
    }

    fn event_by_upstream_tx_id(&mut self, upstream_tx_id: &str) -> Result<Option<CreditEvent>> {
        match self.get_locked(cf::EVENTS_BY_UPSTREAM, &keys::upstream_key(upstream_tx_id))? {
            Some(raw) => self.event(&EventId::from_bytes(id_bytes(&raw)?)),
            None => Ok(None),
        }
    }

    fn put_account(&mut self, account: &Account) -> Result<()> {
        self.put(cf::ACCOUNTS, &keys::account_key(&account.id), &serialize(account)?)?;
        self.put(
            cf::ACCOUNTS_BY_OWNER,
            &keys::owner_key(&account.owner()),
            &account.id.to_bytes(),
        )
    }

    fn insert_event(&mut self, event: &CreditEvent) -> Result<()> {
        if let Some(upstream_tx_id) = &event.upstream_tx_id {
            let key = keys::upstream_key(upstream_tx_id);
            if self.get_locked(cf::EVENTS_BY_UPSTREAM, &key)?.is_some() {
                return Err(StoreError::DuplicateUpstreamTx {
                    upstream_tx_id: upstream_tx_id.clone(),
                });
            }
            self.put(cf::EVENTS_BY_UPSTREAM, &key, &event.id.to_bytes())?;
        }

        self.put(cf::EVENTS, &keys::event_key(&event.id), &serialize(event)?)?;
        self.put(
            cf::EVENTS_BY_ACCOUNT,
            &keys::account_event_key(&event.account_id, &event.id),
            &[],
        )?;
        if let Some(agent_id) = &event.agent_id {
            self.put(cf::EVENTS_BY_AGENT, &keys::agent_event_key(agent_id, &event.id), &[])?;
        }
        Ok(())
    }

    fn update_event(&mut self, event: &CreditEvent) -> Result<()> {
        self.put(cf::EVENTS, &keys::event_key(&event.id), &serialize(event)?)
    }

    fn insert_transaction(&mut self, transaction: &CreditTransaction) -> Result<()> {
        let key = keys::transaction_key(&transaction.id);
        if self.get_locked(cf::TRANSACTIONS, &key)?.is_some() {
            return Err(StoreError::Duplicate(format!("transaction {}", transaction.id)));
        }
        self.put(cf::TRANSACTIONS, &key, &serialize(transaction)?)?;
        self.put(
            cf::TRANSACTIONS_BY_ACCOUNT,
            &keys::account_transaction_key(&transaction.account_id, &transaction.id),
            &[],
        )?;
        self.put(
            cf::TRANSACTIONS_BY_EVENT,
            &keys::event_transaction_key(&transaction.event_id, &transaction.id),
            &[],
        )
    }

    fn claim_refill_epoch(&mut self, account_id: &AccountId, epoch: RefillEpoch) -> Result<bool> {
        let key = keys::refill_epoch_key(account_id, epoch);
        if self.get_locked(cf::REFILL_EPOCHS, &key)?.is_some() {
            return Ok(false);
        }
        self.put(cf::REFILL_EPOCHS, &key, &[])?;
        Ok(true)
    }

    fn commit(self: Box<Self>) -> Result<()> {
        self.txn.commit().map_err(|e| db_error(&e))
    }
}
