//! In-memory storage implementation.
//!
//! All tables sit behind one mutex. A transaction holds the lock from `begin` until it
//! commits or is dropped, so transactions are fully serialized; writes are staged and
//! merged into the tables only on commit, so a transaction that panics leaves the tables
//! untouched and the poisoned lock is simply taken over.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard, PoisonError};

use agent_ledger_core::{
    Account, AccountId, CreditEvent, CreditTransaction, EventId, Order, Owner, RefillEpoch,
    TransactionId,
};

use crate::error::{Result, StoreError};
use crate::query::{EventQuery, TaskWatermark, TransactionQuery};
use crate::{Store, StoreTxn};

#[derive(Debug, Default)]
struct Tables {
    accounts: BTreeMap<AccountId, Account>,
    accounts_by_owner: HashMap<Owner, AccountId>,
    events: BTreeMap<EventId, CreditEvent>,
    events_by_upstream: HashMap<String, EventId>,
    transactions: BTreeMap<TransactionId, CreditTransaction>,
    refill_epochs: HashSet<(AccountId, RefillEpoch)>,
    watermarks: HashMap<String, TaskWatermark>,
}

impl Tables {
    fn merge(&mut self, staged: Self) {
        self.accounts.extend(staged.accounts);
        self.accounts_by_owner.extend(staged.accounts_by_owner);
        self.events.extend(staged.events);
        self.events_by_upstream.extend(staged.events_by_upstream);
        self.transactions.extend(staged.transactions);
        self.refill_epochs.extend(staged.refill_epochs);
        self.watermarks.extend(staged.watermarks);
    }
}

/// Storage backed by in-process maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Store for MemoryStore {
    fn begin(&self) -> Result<Box<dyn StoreTxn + '_>> {
        Ok(Box::new(MemoryTxn {
            tables: self.lock(),
            staged: Tables::default(),
        }))
    }

    fn get_account(&self, id: &AccountId) -> Result<Option<Account>> {
        Ok(self.lock().accounts.get(id).cloned())
    }

    fn find_account(&self, owner: &Owner) -> Result<Option<Account>> {
        let tables = self.lock();
        Ok(tables
            .accounts_by_owner
            .get(owner)
            .and_then(|id| tables.accounts.get(id))
            .cloned())
    }

    fn refillable_accounts(&self) -> Result<Vec<AccountId>> {
        Ok(self
            .lock()
            .accounts
            .values()
            .filter(|a| a.refill_amount > rust_decimal::Decimal::ZERO)
            .map(|a| a.id)
            .collect())
    }

    fn get_event(&self, id: &EventId) -> Result<Option<CreditEvent>> {
        Ok(self.lock().events.get(id).cloned())
    }

    fn get_event_by_upstream_tx_id(&self, upstream_tx_id: &str) -> Result<Option<CreditEvent>> {
        let tables = self.lock();
        Ok(tables
            .events_by_upstream
            .get(upstream_tx_id)
            .and_then(|id| tables.events.get(id))
            .cloned())
    }

    fn get_events(&self, ids: &[EventId]) -> Result<Vec<CreditEvent>> {
        let tables = self.lock();
        Ok(ids
            .iter()
            .filter_map(|id| tables.events.get(id).cloned())
            .collect())
    }

    fn scan_events(&self, query: &EventQuery) -> Result<Vec<CreditEvent>> {
        let tables = self.lock();
        let lower = match (query.order, query.cursor) {
            (Order::Asc, Some(cursor)) => Bound::Excluded(cursor),
            _ => Bound::Unbounded,
        };
        let upper = match (query.order, query.cursor) {
            (Order::Desc, Some(cursor)) => Bound::Excluded(cursor),
            _ => Bound::Unbounded,
        };
        let range = tables.events.range((lower, upper)).map(|(_, event)| event);
        let iter: Box<dyn Iterator<Item = &CreditEvent>> = match query.order {
            Order::Asc => Box::new(range),
            Order::Desc => Box::new(range.rev()),
        };

        let mut events = Vec::new();
        for event in iter {
            if events.len() >= query.limit || query.is_past_range(event) {
                break;
            }
            if query.matches(event) {
                events.push(event.clone());
            }
        }
        Ok(events)
    }

    fn get_event_transactions(&self, event_id: &EventId) -> Result<Vec<CreditTransaction>> {
        Ok(self
            .lock()
            .transactions
            .values()
            .filter(|tx| tx.event_id == *event_id)
            .cloned()
            .collect())
    }

    fn scan_transactions(&self, query: &TransactionQuery) -> Result<Vec<CreditTransaction>> {
        let tables = self.lock();
        let upper = query.cursor.map_or(Bound::Unbounded, Bound::Excluded);
        Ok(tables
            .transactions
            .range((Bound::Unbounded, upper))
            .rev()
            .map(|(_, tx)| tx)
            .filter(|tx| query.matches(tx))
            .take(query.limit)
            .cloned()
            .collect())
    }

    fn get_task_watermark(&self, task: &str) -> Result<Option<TaskWatermark>> {
        Ok(self.lock().watermarks.get(task).cloned())
    }

    fn put_task_watermark(&self, watermark: &TaskWatermark) -> Result<()> {
        self.lock()
            .watermarks
            .insert(watermark.task.clone(), watermark.clone());
        Ok(())
    }
}

/// A transaction over the in-memory tables.
struct MemoryTxn<'a> {
    tables: MutexGuard<'a, Tables>,
    staged: Tables,
}

impl StoreTxn for MemoryTxn<'_> {
    fn account(&mut self, id: &AccountId) -> Result<Option<Account>> {
        Ok(self
            .staged
            .accounts
            .get(id)
            .or_else(|| self.tables.accounts.get(id))
            .cloned())
    }

    fn account_by_owner(&mut self, owner: &Owner) -> Result<Option<Account>> {
        let id = self
            .staged
            .accounts_by_owner
            .get(owner)
            .or_else(|| self.tables.accounts_by_owner.get(owner))
            .copied();
        match id {
            Some(id) => self.account(&id),
            None => Ok(None),
        }
    }

    fn event(&mut self, id: &EventId) -> Result<Option<CreditEvent>> {
        Ok(self
            .staged
            .events
            .get(id)
            .or_else(|| self.tables.events.get(id))
            .cloned())
    }

    fn event_by_upstream_tx_id(&mut self, upstream_tx_id: &str) -> Result<Option<CreditEvent>> {
        let id = self
            .staged
            .events_by_upstream
            .get(upstream_tx_id)
            .or_else(|| self.tables.events_by_upstream.get(upstream_tx_id))
            .copied();
        match id {
            Some(id) => self.event(&id),
            None => Ok(None),
        }
    }

    fn put_account(&mut self, account: &Account) -> Result<()> {
        self.staged
            .accounts_by_owner
            .insert(account.owner(), account.id);
        self.staged.accounts.insert(account.id, account.clone());
        Ok(())
    }

    fn insert_event(&mut self, event: &CreditEvent) -> Result<()> {
        if let Some(upstream_tx_id) = &event.upstream_tx_id {
            if self.staged.events_by_upstream.contains_key(upstream_tx_id)
                || self.tables.events_by_upstream.contains_key(upstream_tx_id)
            {
                return Err(StoreError::DuplicateUpstreamTx {
                    upstream_tx_id: upstream_tx_id.clone(),
                });
            }
            self.staged
                .events_by_upstream
                .insert(upstream_tx_id.clone(), event.id);
        }
        self.staged.events.insert(event.id, event.clone());
        Ok(())
    }

    fn update_event(&mut self, event: &CreditEvent) -> Result<()> {
        self.staged.events.insert(event.id, event.clone());
        Ok(())
    }

    fn insert_transaction(&mut self, transaction: &CreditTransaction) -> Result<()> {
        if self.staged.transactions.contains_key(&transaction.id)
            || self.tables.transactions.contains_key(&transaction.id)
        {
            return Err(StoreError::Duplicate(format!("transaction {}", transaction.id)));
        }
        self.staged
            .transactions
            .insert(transaction.id, transaction.clone());
        Ok(())
    }

    fn claim_refill_epoch(&mut self, account_id: &AccountId, epoch: RefillEpoch) -> Result<bool> {
        let claim = (*account_id, epoch);
        if self.tables.refill_epochs.contains(&claim) {
            return Ok(false);
        }
        Ok(self.staged.refill_epochs.insert(claim))
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTxn { mut tables, staged } = *self;
        tables.merge(staged);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_ledger_core::{CreditType, EventType, OwnerId, TransactionType};
    use rust_decimal_macros::dec;

    use crate::query::EventScope;

    fn user(id: &str) -> Owner {
        Owner::user(OwnerId::new(id).unwrap())
    }

    #[test]
    fn uncommitted_writes_are_discarded() {
        let store = MemoryStore::new();
        let account = Account::new(user("u1"));
        {
            let mut txn = store.begin().unwrap();
            txn.put_account(&account).unwrap();
            assert!(txn.account(&account.id).unwrap().is_some());
        }
        assert!(store.get_account(&account.id).unwrap().is_none());

        let mut txn = store.begin().unwrap();
        txn.put_account(&account).unwrap();
        txn.commit().unwrap();
        assert_eq!(
            store.find_account(&user("u1")).unwrap().map(|a| a.id),
            Some(account.id)
        );
    }

    #[test]
    fn panicked_transaction_leaves_store_usable() {
        let store = MemoryStore::new();
        let account = Account::new(user("u1"));

        let panicked = std::thread::scope(|scope| {
            scope
                .spawn(|| {
                    let mut txn = store.begin().unwrap();
                    txn.put_account(&account).unwrap();
                    panic!("failure while the transaction is open");
                })
                .join()
                .is_err()
        });
        assert!(panicked);
        assert!(store.tables.is_poisoned());

        assert!(store.get_account(&account.id).unwrap().is_none());
        let mut txn = store.begin().unwrap();
        txn.put_account(&account).unwrap();
        txn.commit().unwrap();
        assert!(store.find_account(&user("u1")).unwrap().is_some());
    }

    #[test]
    fn upstream_key_is_unique() {
        let store = MemoryStore::new();
        let account = Account::new(user("u1"));
        let first = CreditEvent::income(EventType::Recharge, account.id, dec!(1), CreditType::Permanent)
            .with_upstream_tx_id(Some("tx-1".into()));
        let second = CreditEvent::income(EventType::Recharge, account.id, dec!(1), CreditType::Permanent)
            .with_upstream_tx_id(Some("tx-1".into()));

        let mut txn = store.begin().unwrap();
        txn.insert_event(&first).unwrap();
        assert!(matches!(
            txn.insert_event(&second),
            Err(StoreError::DuplicateUpstreamTx { .. })
        ));
        txn.commit().unwrap();

        let mut txn = store.begin().unwrap();
        assert!(txn.insert_event(&second).is_err());
        assert_eq!(
            txn.event_by_upstream_tx_id("tx-1").unwrap().map(|e| e.id),
            Some(first.id)
        );
    }

    #[test]
    fn refill_epoch_claimed_once() {
        let store = MemoryStore::new();
        let id = AccountId::generate();
        let epoch = RefillEpoch::current();

        let mut txn = store.begin().unwrap();
        assert!(txn.claim_refill_epoch(&id, epoch).unwrap());
        assert!(!txn.claim_refill_epoch(&id, epoch).unwrap());
        txn.commit().unwrap();

        let mut txn = store.begin().unwrap();
        assert!(!txn.claim_refill_epoch(&id, epoch).unwrap());
    }

    #[test]
    fn scans_follow_cursor() {
        let store = MemoryStore::new();
        let account = Account::new(user("u1"));
        let events: Vec<_> = (0..5)
            .map(|_| CreditEvent::income(EventType::Reward, account.id, dec!(1), CreditType::Reward))
            .collect();
        let mut txn = store.begin().unwrap();
        for event in &events {
            txn.insert_event(event).unwrap();
            let tx = CreditTransaction::credit(
                account.id,
                event.id,
                TransactionType::Reward,
                Some(CreditType::Reward),
                dec!(1),
            );
            txn.insert_transaction(&tx).unwrap();
        }
        txn.commit().unwrap();

        let mut query = EventQuery::new(EventScope::Account(account.id), 2);
        let page = store.scan_events(&query).unwrap();
        assert_eq!(page.iter().map(|e| e.id).collect::<Vec<_>>(), vec![events[4].id, events[3].id]);

        query.cursor = Some(events[3].id);
        let page = store.scan_events(&query).unwrap();
        assert_eq!(page[0].id, events[2].id);

        query.order = Order::Asc;
        let page = store.scan_events(&query).unwrap();
        assert_eq!(page.iter().map(|e| e.id).collect::<Vec<_>>(), vec![events[4].id]);

        let txs = store
            .scan_transactions(&TransactionQuery {
                account_id: account.id,
                tx_types: vec![TransactionType::Reward],
                credit_debit: None,
                cursor: None,
                limit: 10,
            })
            .unwrap();
        assert_eq!(txs.len(), 5);
        assert!(txs.windows(2).all(|w| w[0].id > w[1].id));
        assert_eq!(store.get_event_transactions(&events[0].id).unwrap().len(), 1);
    }
}
