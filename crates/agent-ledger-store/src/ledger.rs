//! The ledger engine.
//!
//! Every balance-changing operation runs as one [`StoreTxn`]: the touched accounts are
//! locked in ascending owner order, the domain rules are applied, and the accounts, the
//! event and its postings are committed together. Idempotency keys are checked inside the
//! same transaction, and a duplicate that slips past the check is reported by the store
//! and answered as "already applied".
//!
//! Store read methods are never called while a transaction is open; a backend is free to
//! serialize transactions against its readers.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use agent_ledger_core::amount::{checked_sum, require_positive};
use agent_ledger_core::{
    authorize, check_balanced, refill_credit, Account, AccountId, AgentId, AgentStatistics,
    CreditDebit, CreditEvent, CreditTransaction, CreditType, EventId, EventType, FeeSplitPolicy,
    LedgerError, Order, Owner, OwnerId, OwnerType, Page, PageRequest, PlatformAccount,
    QuotaDefaults, QuotaUpdate, RefillEpoch, Result, RewardType, StatisticsBuilder,
    TransactionId, TransactionType,
};

use crate::query::{EventFilter, EventQuery, EventScope, TransactionQuery};
use crate::{Store, StoreTxn};

/// Attempts made for an operation that keeps hitting storage contention.
const MAX_ATTEMPTS: u32 = 3;

/// Batch size used when aggregating over every event of an agent.
const STATS_BATCH: usize = 500;

/// A paid agent action to be billed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendRequest {
    /// Who pays.
    pub owner: Owner,
    /// The agent whose action is billed.
    pub agent_id: AgentId,
    /// Gross cost of the action.
    pub amount: Decimal,
    /// How the cost is shared.
    #[serde(default)]
    pub fee_policy: FeeSplitPolicy,
    /// Idempotency key.
    #[serde(default)]
    pub upstream_tx_id: Option<String>,
    /// Free-text note.
    #[serde(default)]
    pub note: Option<String>,
}

/// Outcome of a spend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpendReceipt {
    /// The spender's account after the spend.
    pub account: Account,
    /// The spend event.
    pub event: CreditEvent,
    /// All postings of the event.
    pub transactions: Vec<CreditTransaction>,
    /// Whether the idempotency key had already been used; nothing was written.
    pub already_applied: bool,
}

/// Outcome of refilling one account.
#[derive(Debug, Clone, PartialEq)]
pub struct RefillOutcome {
    /// The account after the refill.
    pub account: Account,
    /// Credits added to the free pool.
    pub credited: Decimal,
    /// Whether this call claimed the epoch.
    pub claimed: bool,
}

/// Totals of one refill pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefillSummary {
    /// The epoch refilled.
    pub epoch: Option<RefillEpoch>,
    /// Accounts with a positive refill amount.
    pub accounts: usize,
    /// Accounts that received credits.
    pub refilled: usize,
    /// Accounts whose refill failed.
    pub failed: usize,
}

/// A posting with its event attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionWithEvent {
    /// The posting.
    #[serde(flatten)]
    pub transaction: CreditTransaction,
    /// The event the posting belongs to.
    pub event: Option<CreditEvent>,
}

/// Parameters of an operation that adds credits from an issuer.
struct Mint<'a> {
    owner: &'a Owner,
    amount: Decimal,
    upstream_tx_id: &'a str,
    note: Option<&'a str>,
    event_type: EventType,
    tx_type: TransactionType,
    pool: CreditType,
    issuer: PlatformAccount,
}

/// Accounts locked by one transaction, keyed by owner.
type Locked = BTreeMap<Owner, Account>;

/// The credit ledger.
pub struct Ledger {
    store: Arc<dyn Store>,
    quota_defaults: QuotaDefaults,
}

impl Ledger {
    /// Create a ledger over `store`; new accounts start without a free quota.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            quota_defaults: QuotaDefaults::default(),
        }
    }

    /// Create a ledger whose new user accounts receive `defaults`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the defaults are inconsistent.
    pub fn with_quota_defaults(store: Arc<dyn Store>, defaults: QuotaDefaults) -> Result<Self> {
        defaults.validate()?;
        Ok(Self {
            store,
            quota_defaults: defaults,
        })
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Run `op`, retrying when storage reports contention.
    fn retry<T>(&self, name: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 1;
        loop {
            match op() {
                Err(err) if err.is_retryable() && attempt < MAX_ATTEMPTS => {
                    tracing::warn!(operation = name, attempt, error = %err, "Retrying ledger operation");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn new_account(&self, owner: Owner) -> Account {
        let account = Account::new(owner);
        if account.owner_type == OwnerType::User {
            account.with_quota(self.quota_defaults.free_quota, self.quota_defaults.refill_amount)
        } else {
            account
        }
    }

    /// Lock (creating when missing) the accounts of `owners` in ascending owner order.
    fn lock_accounts<'a>(
        &self,
        txn: &mut dyn StoreTxn,
        owners: impl IntoIterator<Item = &'a Owner>,
    ) -> Result<Locked> {
        let ordered: BTreeSet<&Owner> = owners.into_iter().collect();
        let mut locked = Locked::new();
        for owner in ordered {
            let account = match txn.account_by_owner(owner)? {
                Some(account) => account,
                None => {
                    let account = self.new_account(owner.clone());
                    txn.put_account(&account)?;
                    tracing::info!(
                        account_id = %account.id,
                        owner = %owner,
                        "Credit account created"
                    );
                    account
                }
            };
            locked.insert(owner.clone(), account);
        }
        Ok(locked)
    }

    fn take(locked: &mut Locked, owner: &Owner) -> Result<Account> {
        locked
            .remove(owner)
            .ok_or_else(|| LedgerError::Invariant(format!("account of {owner} was not locked")))
    }

    /// Write a finished posting set and commit.
    fn commit_postings(
        mut txn: Box<dyn StoreTxn + '_>,
        accounts: &[&Account],
        event: &CreditEvent,
        transactions: &[CreditTransaction],
    ) -> Result<()> {
        event.validate()?;
        check_balanced(event.id, transactions)?;

        txn.insert_event(event)?;
        for tx in transactions {
            txn.insert_transaction(tx)?;
        }
        for account in accounts {
            txn.put_account(account)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Current account of `owner` after an idempotent replay.
    fn replayed_account(&self, owner: &Owner) -> Result<Account> {
        self.store
            .find_account(owner)?
            .ok_or_else(|| LedgerError::not_found("account", owner))
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    /// Get the account of `owner`, creating it on first reference.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub fn get_or_create(&self, owner: &Owner) -> Result<Account> {
        if let Some(account) = self.store.find_account(owner)? {
            return Ok(account);
        }
        self.retry("get_or_create", || {
            let mut txn = self.store.begin()?;
            let mut locked = self.lock_accounts(txn.as_mut(), [owner])?;
            let account = Self::take(&mut locked, owner)?;
            txn.commit()?;
            Ok(account)
        })
    }

    // =========================================================================
    // Minting: recharge, reward
    // =========================================================================

    /// Add purchased credits.
    ///
    /// A repeated `upstream_tx_id` is a no-op returning the current account.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a non-positive amount or an empty key.
    pub fn recharge(
        &self,
        owner: &Owner,
        amount: Decimal,
        upstream_tx_id: &str,
        note: Option<&str>,
    ) -> Result<Account> {
        self.mint(&Mint {
            owner,
            amount,
            upstream_tx_id,
            note,
            event_type: EventType::Recharge,
            tx_type: TransactionType::Topup,
            pool: CreditType::Permanent,
            issuer: PlatformAccount::Recharge,
        })
    }

    /// Add reward credits.
    ///
    /// A repeated `upstream_tx_id` is a no-op returning the current account.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a non-positive amount or an empty key.
    pub fn reward(
        &self,
        owner: &Owner,
        amount: Decimal,
        upstream_tx_id: &str,
        note: Option<&str>,
        reward_type: RewardType,
    ) -> Result<Account> {
        let tx_type = match reward_type {
            RewardType::Reward => TransactionType::Reward,
            RewardType::EventReward => TransactionType::EventReward,
            RewardType::RechargeBonus => TransactionType::RechargeBonus,
        };
        self.mint(&Mint {
            owner,
            amount,
            upstream_tx_id,
            note,
            event_type: reward_type.event_type(),
            tx_type,
            pool: CreditType::Reward,
            issuer: PlatformAccount::Reward,
        })
    }

    fn mint(&self, mint: &Mint<'_>) -> Result<Account> {
        require_positive("amount", mint.amount)?;
        require_upstream(mint.upstream_tx_id)?;
        if *mint.owner == mint.issuer.owner() {
            return Err(LedgerError::invalid("cannot mint into an issuer account"));
        }

        let result = self.retry(mint.event_type.as_str(), || {
            let mut txn = self.store.begin()?;
            if txn.event_by_upstream_tx_id(mint.upstream_tx_id)?.is_some() {
                drop(txn);
                tracing::debug!(
                    upstream_tx_id = mint.upstream_tx_id,
                    "Upstream transaction already applied"
                );
                return self.replayed_account(mint.owner);
            }

            let issuer_owner = mint.issuer.owner();
            let mut locked = self.lock_accounts(txn.as_mut(), [mint.owner, &issuer_owner])?;
            let mut account = Self::take(&mut locked, mint.owner)?;
            let mut issuer = Self::take(&mut locked, &issuer_owner)?;

            account.credit(mint.pool, mint.amount)?;
            issuer.record_issue(mint.amount)?;

            let mut event = CreditEvent::income(mint.event_type, account.id, mint.amount, mint.pool)
                .with_upstream_tx_id(Some(mint.upstream_tx_id.to_string()))
                .with_note(mint.note.map(str::to_string));
            event.balance_after = account.total_balance();

            let transactions = [
                CreditTransaction::credit(
                    account.id,
                    event.id,
                    mint.tx_type,
                    Some(mint.pool),
                    mint.amount,
                ),
                CreditTransaction::debit(
                    issuer.id,
                    event.id,
                    TransactionType::Issue,
                    None,
                    mint.amount,
                ),
            ];

            Self::commit_postings(txn, &[&account, &issuer], &event, &transactions)?;
            tracing::info!(
                account_id = %account.id,
                event_id = %event.id,
                event_type = %mint.event_type,
                amount = %mint.amount,
                upstream_tx_id = mint.upstream_tx_id,
                "Credits added"
            );
            Ok(account)
        });

        match result {
            Err(LedgerError::Conflict { upstream_tx_id }) => {
                tracing::warn!(%upstream_tx_id, "Concurrent duplicate treated as already applied");
                self.replayed_account(mint.owner)
            }
            other => other,
        }
    }

    // =========================================================================
    // Spending
    // =========================================================================

    /// Bill a paid agent action.
    ///
    /// The cost is drawn from free credits first, then reward credits, then purchased
    /// credits, and shared between the platform, the agent and an optional referrer.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientBalance` without touching any pool when the account cannot
    /// cover the cost, and `InvalidArgument` for a bad amount or fee policy.
    pub fn spend(&self, request: &SpendRequest) -> Result<SpendReceipt> {
        require_positive("amount", request.amount)?;
        if let Some(upstream_tx_id) = &request.upstream_tx_id {
            require_upstream(upstream_tx_id)?;
        }
        let fees = request.fee_policy.split(request.amount)?;

        let result = self.retry("spend", || {
            let mut txn = self.store.begin()?;
            if let Some(upstream_tx_id) = &request.upstream_tx_id {
                if let Some(existing) = txn.event_by_upstream_tx_id(upstream_tx_id)? {
                    drop(txn);
                    return self.replayed_spend(&request.owner, existing);
                }
            }

            let agent_owner = Owner::new(OwnerType::Agent, OwnerId::from(request.agent_id.clone()));
            let referrer_owner = request
                .fee_policy
                .referrer
                .as_ref()
                .map(|r| Owner::user(r.owner_id.clone()));
            let consumption = PlatformAccount::Consumption.owner();
            let platform_fee = PlatformAccount::Fee.owner();

            let legs: Vec<(&Owner, TransactionType, Decimal)> = [
                (Some(&consumption), TransactionType::ReceiveBaseAmount, fees.base),
                (Some(&platform_fee), TransactionType::ReceiveFeePlatform, fees.platform),
                (Some(&agent_owner), TransactionType::ReceiveFeeAgent, fees.agent),
                (referrer_owner.as_ref(), TransactionType::ReceiveFeeReferrer, fees.referrer),
            ]
            .into_iter()
            .filter_map(|(owner, tx_type, amount)| {
                owner
                    .filter(|_| amount > Decimal::ZERO)
                    .map(|owner| (owner, tx_type, amount))
            })
            .collect();

            let mut locked = self.lock_accounts(
                txn.as_mut(),
                std::iter::once(&request.owner).chain(legs.iter().map(|(owner, _, _)| *owner)),
            )?;

            // Checked before any pool changes; an error here drops the transaction.
            let sources = locked
                .get(&request.owner)
                .ok_or_else(|| LedgerError::Invariant("spender was not locked".into()))?
                .plan_debit(request.amount)?;

            let event_id = EventId::generate();
            let mut transactions = Vec::with_capacity(3 + legs.len());

            let spender = locked
                .get_mut(&request.owner)
                .ok_or_else(|| LedgerError::Invariant("spender was not locked".into()))?;
            spender.apply_debit(&sources)?;
            let spender_id = spender.id;
            for (pool, amount) in sources.portions() {
                transactions.push(CreditTransaction::debit(
                    spender_id,
                    event_id,
                    TransactionType::Spend,
                    Some(pool),
                    amount,
                ));
            }

            for (owner, tx_type, amount) in &legs {
                let recipient = locked
                    .get_mut(*owner)
                    .ok_or_else(|| LedgerError::Invariant(format!("{owner} was not locked")))?;
                recipient.credit(CreditType::Permanent, *amount)?;
                if tx_type.is_fee() {
                    recipient.total_fee_income = checked_sum(recipient.total_fee_income, *amount)?;
                }
                transactions.push(CreditTransaction::credit(
                    recipient.id,
                    event_id,
                    *tx_type,
                    Some(CreditType::Permanent),
                    *amount,
                ));
            }

            let account = locked
                .get(&request.owner)
                .cloned()
                .ok_or_else(|| LedgerError::Invariant("spender was not locked".into()))?;
            let mut event = CreditEvent::spend(account.id, request.agent_id.clone(), &fees, &sources)
                .with_upstream_tx_id(request.upstream_tx_id.clone())
                .with_note(request.note.clone());
            event.id = event_id;
            event.balance_after = account.total_balance();

            let accounts: Vec<&Account> = locked.values().collect();
            Self::commit_postings(txn, &accounts, &event, &transactions)?;

            tracing::info!(
                account_id = %account.id,
                event_id = %event.id,
                agent_id = %request.agent_id,
                amount = %request.amount,
                free = %sources.free,
                reward = %sources.reward,
                permanent = %sources.permanent,
                "Agent action billed"
            );
            Ok(SpendReceipt {
                account,
                event,
                transactions,
                already_applied: false,
            })
        });

        match (result, &request.upstream_tx_id) {
            (Err(LedgerError::Conflict { upstream_tx_id }), Some(_)) => {
                tracing::warn!(%upstream_tx_id, "Concurrent duplicate spend treated as already applied");
                let existing = self
                    .store
                    .get_event_by_upstream_tx_id(&upstream_tx_id)?
                    .ok_or_else(|| LedgerError::not_found("event", &upstream_tx_id))?;
                self.replayed_spend(&request.owner, existing)
            }
            (other, _) => other,
        }
    }

    /// Answer a spend whose key is already used, provided the key belongs to a spend by
    /// the same account.
    fn replayed_spend(&self, owner: &Owner, event: CreditEvent) -> Result<SpendReceipt> {
        let same_spend = |account: &Account| {
            event.event_type == EventType::Spend && event.account_id == account.id
        };
        let account = match self.store.find_account(owner)?.filter(same_spend) {
            Some(account) => account,
            None => {
                tracing::warn!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    owner = %owner,
                    "Upstream transaction id belongs to another operation"
                );
                return Err(LedgerError::Conflict {
                    upstream_tx_id: event.upstream_tx_id.unwrap_or_default(),
                });
            }
        };
        tracing::debug!(event_id = %event.id, "Spend already applied");
        let transactions = self.store.get_event_transactions(&event.id)?;
        Ok(SpendReceipt {
            account,
            event,
            transactions,
            already_applied: true,
        })
    }

    // =========================================================================
    // Quota
    // =========================================================================

    /// Change a user's daily quota and hourly refill amount.
    ///
    /// Writes a `daily_quota` audit event holding the values before and after. A repeated
    /// `upstream_tx_id` is a no-op returning the current account.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when neither value is given or the refill amount would
    /// exceed the quota.
    pub fn update_daily_quota(
        &self,
        user_id: &OwnerId,
        update: QuotaUpdate,
        upstream_tx_id: &str,
        note: Option<&str>,
    ) -> Result<Account> {
        update.validate()?;
        require_upstream(upstream_tx_id)?;
        let owner = Owner::user(user_id.clone());

        let result = self.retry("update_daily_quota", || {
            let mut txn = self.store.begin()?;
            if txn.event_by_upstream_tx_id(upstream_tx_id)?.is_some() {
                drop(txn);
                tracing::debug!(upstream_tx_id, "Quota update already applied");
                return self.replayed_account(&owner);
            }

            let mut locked = self.lock_accounts(txn.as_mut(), [&owner])?;
            let mut account = Self::take(&mut locked, &owner)?;
            let metadata = update.apply(&mut account)?;

            let mut event = CreditEvent::audit(EventType::DailyQuota, account.id, metadata)
                .with_upstream_tx_id(Some(upstream_tx_id.to_string()))
                .with_note(note.map(str::to_string));
            event.balance_after = account.total_balance();

            Self::commit_postings(txn, &[&account], &event, &[])?;
            tracing::info!(
                account_id = %account.id,
                free_quota = %account.free_quota,
                refill_amount = %account.refill_amount,
                "Daily quota updated"
            );
            Ok(account)
        });

        match result {
            Err(LedgerError::Conflict { upstream_tx_id }) => {
                tracing::warn!(%upstream_tx_id, "Concurrent duplicate quota update treated as already applied");
                self.replayed_account(&owner)
            }
            other => other,
        }
    }

    /// Refill one account's free pool for `epoch`.
    ///
    /// Each account is refilled at most once per epoch; the claim is committed with the
    /// credit, so a repeated call is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the account does not exist.
    pub fn refill(&self, account_id: &AccountId, epoch: RefillEpoch) -> Result<RefillOutcome> {
        let owner = self
            .store
            .get_account(account_id)?
            .ok_or_else(|| LedgerError::not_found("account", account_id))?
            .owner();

        self.retry("refill", || {
            let mut txn = self.store.begin()?;
            let issuer_owner = PlatformAccount::Refill.owner();
            let mut locked = self.lock_accounts(txn.as_mut(), [&owner, &issuer_owner])?;
            let mut account = Self::take(&mut locked, &owner)?;
            let mut issuer = Self::take(&mut locked, &issuer_owner)?;

            if !txn.claim_refill_epoch(&account.id, epoch)? {
                return Ok(RefillOutcome {
                    account,
                    credited: Decimal::ZERO,
                    claimed: false,
                });
            }
            account.last_refill_epoch = Some(epoch);

            let amount = refill_credit(&account);
            if amount.is_zero() {
                txn.put_account(&account)?;
                txn.commit()?;
                return Ok(RefillOutcome {
                    account,
                    credited: Decimal::ZERO,
                    claimed: true,
                });
            }

            account.credit(CreditType::Free, amount)?;
            issuer.record_issue(amount)?;

            let mut event = CreditEvent::income(EventType::Refill, account.id, amount, CreditType::Free)
                .with_note(Some(format!("refill {epoch}")));
            event.balance_after = account.total_balance();
            let transactions = [
                CreditTransaction::credit(
                    account.id,
                    event.id,
                    TransactionType::Refill,
                    Some(CreditType::Free),
                    amount,
                ),
                CreditTransaction::debit(issuer.id, event.id, TransactionType::Issue, None, amount),
            ];

            Self::commit_postings(txn, &[&account, &issuer], &event, &transactions)?;
            tracing::debug!(account_id = %account.id, %epoch, amount = %amount, "Free credits refilled");
            Ok(RefillOutcome {
                account,
                credited: amount,
                claimed: true,
            })
        })
    }

    /// Refill every account with a positive refill amount for `epoch`.
    ///
    /// A failing account is logged and counted; the pass continues with the rest.
    ///
    /// # Errors
    ///
    /// Returns an error only if the accounts cannot be listed.
    pub fn refill_all(&self, epoch: RefillEpoch) -> Result<RefillSummary> {
        let ids = self.store.refillable_accounts()?;
        let mut summary = RefillSummary {
            epoch: Some(epoch),
            accounts: ids.len(),
            ..RefillSummary::default()
        };

        for id in &ids {
            match self.refill(id, epoch) {
                Ok(outcome) if outcome.credited > Decimal::ZERO => summary.refilled += 1,
                Ok(_) => {}
                Err(err) => {
                    summary.failed += 1;
                    tracing::error!(account_id = %id, %epoch, error = %err, "Refill failed");
                }
            }
        }

        tracing::info!(
            %epoch,
            accounts = summary.accounts,
            refilled = summary.refilled,
            failed = summary.failed,
            "Refill pass finished"
        );
        Ok(summary)
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Get an event, optionally checking that it belongs to user `claimed`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the event does not exist and `Forbidden` if it belongs to
    /// another owner.
    pub fn fetch_event_by_id(&self, id: &EventId, claimed: Option<&OwnerId>) -> Result<CreditEvent> {
        let event = self
            .store
            .get_event(id)?
            .ok_or_else(|| LedgerError::not_found("event", id))?;
        if claimed.is_some() {
            let account = self
                .store
                .get_account(&event.account_id)?
                .ok_or_else(|| LedgerError::not_found("account", event.account_id))?;
            authorize(claimed, &account)?;
        }
        Ok(event)
    }

    /// Get an event by its idempotency key.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no event uses the key.
    pub fn fetch_event_by_upstream_tx_id(&self, upstream_tx_id: &str) -> Result<CreditEvent> {
        self.store
            .get_event_by_upstream_tx_id(upstream_tx_id)?
            .ok_or_else(|| LedgerError::not_found("event", upstream_tx_id))
    }

    /// Replace the note of an event, optionally checking ownership first.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the event does not exist and `Forbidden` if it belongs to
    /// another owner.
    pub fn update_event_note(
        &self,
        id: &EventId,
        note: Option<String>,
        claimed: Option<&OwnerId>,
    ) -> Result<CreditEvent> {
        self.retry("update_event_note", || {
            let mut txn = self.store.begin()?;
            let mut event = txn
                .event(id)?
                .ok_or_else(|| LedgerError::not_found("event", id))?;
            if claimed.is_some() {
                let account = txn
                    .account(&event.account_id)?
                    .ok_or_else(|| LedgerError::not_found("account", event.account_id))?;
                authorize(claimed, &account)?;
            }

            event.note.clone_from(&note);
            txn.update_event(&event)?;
            txn.commit()?;
            tracing::info!(event_id = %id, "Event note updated");
            Ok(event)
        })
    }

    // =========================================================================
    // Listings
    // =========================================================================

    fn list_events(
        &self,
        scope: EventScope,
        filter: EventFilter,
        agent_fee_only: bool,
        order: Order,
        page: &PageRequest,
    ) -> Result<Page<CreditEvent>> {
        let cursor = page.parse::<EventId>()?;
        let rows = self.store.scan_events(&EventQuery {
            scope,
            filter,
            agent_fee_only,
            cursor,
            order,
            limit: page.limit + 1,
        })?;
        Ok(Page::from_rows(rows, page, |e| e.id.to_string()))
    }

    /// List every event; the monitoring feed.
    ///
    /// With [`Order::Asc`] a caller can poll with the returned cursor and receive new
    /// events as they are committed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a bad limit or cursor.
    pub fn list_credit_events(
        &self,
        filter: EventFilter,
        order: Order,
        page: &PageRequest,
    ) -> Result<Page<CreditEvent>> {
        self.list_events(EventScope::All, filter, false, order, page)
    }

    /// List the events of a user's account, newest first.
    ///
    /// A user without an account gets an empty page.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a bad limit or cursor.
    pub fn list_credit_events_by_user(
        &self,
        user_id: &OwnerId,
        filter: EventFilter,
        page: &PageRequest,
    ) -> Result<Page<CreditEvent>> {
        page.parse::<EventId>()?;
        match self.store.find_account(&Owner::user(user_id.clone()))? {
            Some(account) => {
                self.list_events(EventScope::Account(account.id), filter, false, Order::Desc, page)
            }
            None => Ok(Page::empty(page)),
        }
    }

    /// List the events that paid `agent_id` a fee, newest first.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a bad limit or cursor.
    pub fn list_fee_events_by_agent(
        &self,
        agent_id: &AgentId,
        filter: EventFilter,
        page: &PageRequest,
    ) -> Result<Page<CreditEvent>> {
        self.list_events(EventScope::Agent(agent_id.clone()), filter, true, Order::Desc, page)
    }

    /// List a user's postings newest first, each with its event attached.
    ///
    /// A user without an account gets an empty page.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a bad limit or cursor.
    pub fn list_transactions(
        &self,
        user_id: &OwnerId,
        tx_types: &[TransactionType],
        credit_debit: Option<CreditDebit>,
        page: &PageRequest,
    ) -> Result<Page<TransactionWithEvent>> {
        let cursor = page.parse::<TransactionId>()?;
        let Some(account) = self.store.find_account(&Owner::user(user_id.clone()))? else {
            return Ok(Page::empty(page));
        };

        let rows = self.store.scan_transactions(&TransactionQuery {
            account_id: account.id,
            tx_types: tx_types.to_vec(),
            credit_debit,
            cursor,
            limit: page.limit + 1,
        })?;
        let page = Page::from_rows(rows, page, |tx| tx.id.to_string());

        let event_ids: Vec<EventId> = page
            .data
            .iter()
            .map(|tx| tx.event_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let events: BTreeMap<EventId, CreditEvent> = self
            .store
            .get_events(&event_ids)?
            .into_iter()
            .map(|e| (e.id, e))
            .collect();

        Ok(page.map(|transaction| TransactionWithEvent {
            event: events.get(&transaction.event_id).cloned(),
            transaction,
        }))
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Income statistics of an agent, with the 24 hour window ending at `now`.
    ///
    /// Creates the agent's account on first reference.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub fn agent_statistics(&self, agent_id: &AgentId, now: DateTime<Utc>) -> Result<AgentStatistics> {
        let account = self.get_or_create(&Owner::new(
            OwnerType::Agent,
            OwnerId::from(agent_id.clone()),
        ))?;

        let mut builder = StatisticsBuilder::new(now);
        let mut query = EventQuery::new(EventScope::Agent(agent_id.clone()), STATS_BATCH);
        query.order = Order::Asc;
        loop {
            let batch = self.store.scan_events(&query)?;
            for event in &batch {
                builder.push(event);
            }
            match batch.last() {
                Some(last) if batch.len() == STATS_BATCH => query.cursor = Some(last.id),
                _ => break,
            }
        }
        Ok(builder.finish(agent_id.clone(), &account))
    }
}

fn require_upstream(upstream_tx_id: &str) -> Result<()> {
    if upstream_tx_id.trim().is_empty() {
        return Err(LedgerError::invalid("upstream_tx_id must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_ledger_core::amount::MAX_AMOUNT;
    use agent_ledger_core::{Direction, ReferrerShare};
    use rust_decimal_macros::dec;

    use crate::query::TaskWatermark;
    use crate::MemoryStore;

    fn user(id: &str) -> Owner {
        Owner::user(OwnerId::new(id).unwrap())
    }

    fn agent(id: &str) -> AgentId {
        AgentId::new(id).unwrap()
    }

    fn ledger() -> Ledger {
        Ledger::new(Arc::new(MemoryStore::new()))
    }

    fn ledger_with_quota(free_quota: Decimal, refill_amount: Decimal) -> Ledger {
        Ledger::with_quota_defaults(
            Arc::new(MemoryStore::new()),
            QuotaDefaults {
                free_quota,
                refill_amount,
            },
        )
        .unwrap()
    }

    fn spend_request(owner: Owner, amount: Decimal, upstream_tx_id: Option<&str>) -> SpendRequest {
        SpendRequest {
            owner,
            agent_id: agent("agent-1"),
            amount,
            fee_policy: FeeSplitPolicy::default(),
            upstream_tx_id: upstream_tx_id.map(str::to_string),
            note: None,
        }
    }

    #[test]
    fn recharge_credits_permanent_pool() {
        let ledger = ledger();
        let account = ledger
            .recharge(&user("u1"), dec!(100), "pay-1", Some("card"))
            .unwrap();
        assert_eq!(account.credits, dec!(100));
        assert_eq!(account.total_income, dec!(100));

        let event = ledger.fetch_event_by_upstream_tx_id("pay-1").unwrap();
        assert_eq!(event.event_type, EventType::Recharge);
        assert_eq!(event.direction, Direction::Income);
        assert_eq!(event.credit_amount, dec!(100));
        assert_eq!(event.balance_after, dec!(100));
        assert_eq!(event.note.as_deref(), Some("card"));

        let issuer = ledger
            .store()
            .find_account(&PlatformAccount::Recharge.owner())
            .unwrap()
            .unwrap();
        assert_eq!(issuer.total_expense, dec!(100));
        assert_eq!(issuer.total_balance(), Decimal::ZERO);
    }

    #[test]
    fn repeated_upstream_id_applies_once() {
        let ledger = ledger();
        ledger.recharge(&user("u1"), dec!(100), "pay-1", None).unwrap();
        let again = ledger.recharge(&user("u1"), dec!(100), "pay-1", None).unwrap();
        assert_eq!(again.credits, dec!(100));

        let page = ledger
            .list_credit_events_by_user(
                &OwnerId::new("u1").unwrap(),
                EventFilter::default(),
                &PageRequest::default(),
            )
            .unwrap();
        assert_eq!(page.data.len(), 1);
    }

    #[test]
    fn concurrent_duplicates_apply_once() {
        let ledger = ledger();
        let owner = user("u1");
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    ledger.recharge(&owner, dec!(10), "pay-race", None).unwrap();
                });
            }
        });
        let account = ledger.get_or_create(&owner).unwrap();
        assert_eq!(account.credits, dec!(10));
    }

    #[test]
    fn reward_type_selects_event_type() {
        let ledger = ledger();
        let account = ledger
            .reward(&user("u1"), dec!(5), "bonus-1", None, RewardType::RechargeBonus)
            .unwrap();
        assert_eq!(account.reward_credits, dec!(5));

        let event = ledger.fetch_event_by_upstream_tx_id("bonus-1").unwrap();
        assert_eq!(event.event_type, EventType::RechargeBonus);
        let transactions = ledger.store().get_event_transactions(&event.id).unwrap();
        assert!(transactions
            .iter()
            .any(|tx| tx.tx_type == TransactionType::RechargeBonus
                && tx.credit_type == Some(CreditType::Reward)));
    }

    #[test]
    fn rejects_bad_amounts_and_keys() {
        let ledger = ledger();
        assert!(matches!(
            ledger.recharge(&user("u1"), dec!(0), "pay-1", None),
            Err(LedgerError::InvalidArgument(_))
        ));
        assert!(matches!(
            ledger.recharge(&user("u1"), dec!(1), " ", None),
            Err(LedgerError::InvalidArgument(_))
        ));
        assert!(matches!(
            ledger.recharge(&PlatformAccount::Recharge.owner(), dec!(1), "pay-2", None),
            Err(LedgerError::InvalidArgument(_))
        ));
    }

    #[test]
    fn spend_draws_free_then_reward_then_permanent() {
        let ledger = ledger_with_quota(dec!(10), dec!(0));
        let owner = user("u1");
        ledger
            .reward(&owner, dec!(5), "r-1", None, RewardType::Reward)
            .unwrap();
        ledger.recharge(&owner, dec!(20), "p-1", None).unwrap();

        let receipt = ledger
            .spend(&spend_request(owner, dec!(12), Some("s-1")))
            .unwrap();
        assert_eq!(receipt.account.free_credits, dec!(0));
        assert_eq!(receipt.account.reward_credits, dec!(3));
        assert_eq!(receipt.account.credits, dec!(20));
        assert_eq!(receipt.event.free_amount, dec!(10));
        assert_eq!(receipt.event.reward_amount, dec!(2));
        assert_eq!(receipt.event.credit_amount, dec!(0));
        assert_eq!(receipt.event.permanent_amount, dec!(2));
        assert_eq!(receipt.event.balance_after, dec!(23));
        assert!(!receipt.already_applied);
    }

    #[test]
    fn insufficient_balance_changes_nothing() {
        let ledger = ledger();
        let owner = user("u1");
        ledger.recharge(&owner, dec!(5), "p-1", None).unwrap();

        let err = ledger
            .spend(&spend_request(owner.clone(), dec!(6), Some("s-1")))
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance { available, required }
                if available == dec!(5) && required == dec!(6)
        ));

        let account = ledger.get_or_create(&owner).unwrap();
        assert_eq!(account.credits, dec!(5));
        assert_eq!(account.total_expense, dec!(0));
        assert!(ledger.store().get_event_by_upstream_tx_id("s-1").unwrap().is_none());
        assert!(ledger
            .store()
            .find_account(&PlatformAccount::Consumption.owner())
            .unwrap()
            .is_none());
    }

    #[test]
    fn spend_postings_balance_and_pay_recipients() {
        let ledger = ledger();
        let owner = user("u1");
        ledger.recharge(&owner, dec!(100), "p-1", None).unwrap();

        let mut request = spend_request(owner, dec!(100), Some("s-1"));
        request.fee_policy = FeeSplitPolicy {
            platform_rate: dec!(0.1),
            agent_rate: dec!(0.2),
            referrer: Some(ReferrerShare {
                owner_id: OwnerId::new("ref").unwrap(),
                rate: dec!(0.05),
            }),
        };
        let receipt = ledger.spend(&request).unwrap();

        let stored = ledger
            .store()
            .get_event_transactions(&receipt.event.id)
            .unwrap();
        assert_eq!(stored.len(), receipt.transactions.len());
        let sum: Decimal = stored.iter().map(CreditTransaction::signed_amount).sum();
        assert_eq!(sum, Decimal::ZERO);

        let store = ledger.store();
        let balance = |owner: &Owner| store.find_account(owner).unwrap().unwrap();
        assert_eq!(balance(&PlatformAccount::Consumption.owner()).credits, dec!(65));
        assert_eq!(balance(&PlatformAccount::Fee.owner()).credits, dec!(10));
        assert_eq!(balance(&PlatformAccount::Fee.owner()).total_fee_income, dec!(10));
        let agent_account = balance(&Owner::new(OwnerType::Agent, OwnerId::new("agent-1").unwrap()));
        assert_eq!(agent_account.credits, dec!(20));
        assert_eq!(agent_account.total_fee_income, dec!(20));
        assert_eq!(balance(&user("ref")).credits, dec!(5));
        assert_eq!(receipt.account.total_balance(), dec!(0));
    }

    #[test]
    fn spend_replay_returns_original_event() {
        let ledger = ledger();
        let owner = user("u1");
        ledger.recharge(&owner, dec!(10), "p-1", None).unwrap();

        let first = ledger
            .spend(&spend_request(owner.clone(), dec!(4), Some("s-1")))
            .unwrap();
        let second = ledger
            .spend(&spend_request(owner, dec!(4), Some("s-1")))
            .unwrap();
        assert!(second.already_applied);
        assert_eq!(second.event.id, first.event.id);
        assert_eq!(second.account.credits, dec!(6));
        assert_eq!(second.transactions.len(), first.transactions.len());
    }

    #[test]
    fn spend_without_upstream_id_is_not_deduplicated() {
        let ledger = ledger();
        let owner = user("u1");
        ledger.recharge(&owner, dec!(10), "p-1", None).unwrap();
        ledger.spend(&spend_request(owner.clone(), dec!(1), None)).unwrap();
        let receipt = ledger.spend(&spend_request(owner, dec!(1), None)).unwrap();
        assert_eq!(receipt.account.credits, dec!(8));
    }

    #[test]
    fn quota_refill_must_not_exceed_quota() {
        let ledger = ledger();
        let id = OwnerId::new("u1").unwrap();
        let err = ledger
            .update_daily_quota(
                &id,
                QuotaUpdate {
                    free_quota: Some(dec!(5)),
                    refill_amount: Some(dec!(10)),
                },
                "q-1",
                None,
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidArgument(_)));

        let account = ledger
            .update_daily_quota(
                &id,
                QuotaUpdate {
                    free_quota: Some(dec!(5)),
                    refill_amount: Some(dec!(5)),
                },
                "q-2",
                Some("upgrade"),
            )
            .unwrap();
        assert_eq!(account.free_quota, dec!(5));
        assert_eq!(account.refill_amount, dec!(5));

        let event = ledger.fetch_event_by_upstream_tx_id("q-2").unwrap();
        assert_eq!(event.event_type, EventType::DailyQuota);
        assert_eq!(event.total_amount, Decimal::ZERO);
        assert_eq!(event.metadata["free_quota"]["after"], serde_json::json!("5"));
        assert!(ledger.store().get_event_transactions(&event.id).unwrap().is_empty());
    }

    #[test]
    fn refill_caps_at_quota_once_per_epoch() {
        let ledger = ledger_with_quota(dec!(10), dec!(5));
        let owner = user("u1");
        let account = ledger
            .spend(&spend_request(owner.clone(), dec!(2), None))
            .unwrap()
            .account;
        assert_eq!(account.free_credits, dec!(8));

        let epoch: RefillEpoch = "2026010112".parse().unwrap();
        let outcome = ledger.refill(&account.id, epoch).unwrap();
        assert!(outcome.claimed);
        assert_eq!(outcome.credited, dec!(2));
        assert_eq!(outcome.account.free_credits, dec!(10));
        assert_eq!(outcome.account.last_refill_epoch, Some(epoch));

        let repeat = ledger.refill(&account.id, epoch).unwrap();
        assert!(!repeat.claimed);
        assert_eq!(repeat.credited, Decimal::ZERO);
        assert_eq!(repeat.account.free_credits, dec!(10));

        let next: RefillEpoch = "2026010113".parse().unwrap();
        let full = ledger.refill(&account.id, next).unwrap();
        assert!(full.claimed);
        assert_eq!(full.credited, Decimal::ZERO);
        assert_eq!(full.account.last_refill_epoch, Some(next));
    }

    #[test]
    fn refill_all_counts_accounts() {
        let ledger = ledger_with_quota(dec!(10), dec!(5));
        ledger.spend(&spend_request(user("u1"), dec!(4), None)).unwrap();
        ledger.get_or_create(&user("u2")).unwrap();

        let epoch: RefillEpoch = "2026010112".parse().unwrap();
        let summary = ledger.refill_all(epoch).unwrap();
        assert_eq!(summary.accounts, 2);
        assert_eq!(summary.refilled, 1);
        assert_eq!(summary.failed, 0);

        let again = ledger.refill_all(epoch).unwrap();
        assert_eq!(again.refilled, 0);
    }

    #[test]
    fn refill_unknown_account_is_not_found() {
        let ledger = ledger();
        let err = ledger
            .refill(&AccountId::generate(), RefillEpoch::current())
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { .. }));
    }

    #[test]
    fn events_paginate_newest_first() {
        let ledger = ledger();
        let owner = user("u1");
        for i in 0..25 {
            ledger
                .recharge(&owner, dec!(1), &format!("p-{i}"), None)
                .unwrap();
        }
        let id = OwnerId::new("u1").unwrap();

        let mut cursor = None;
        let mut sizes = Vec::new();
        let mut seen = Vec::new();
        loop {
            let page = ledger
                .list_credit_events_by_user(
                    &id,
                    EventFilter::default(),
                    &PageRequest::new(cursor.clone(), 10),
                )
                .unwrap();
            sizes.push(page.data.len());
            seen.extend(page.data.iter().map(|e| e.id));
            if !page.has_more {
                break;
            }
            cursor = page.next_cursor;
        }
        assert_eq!(sizes, vec![10, 10, 5]);
        let mut sorted = seen.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(seen, sorted);
    }

    #[test]
    fn unknown_user_lists_empty() {
        let ledger = ledger();
        let id = OwnerId::new("ghost").unwrap();
        let events = ledger
            .list_credit_events_by_user(&id, EventFilter::default(), &PageRequest::default())
            .unwrap();
        assert!(events.data.is_empty());
        assert!(!events.has_more);

        let transactions = ledger
            .list_transactions(&id, &[], None, &PageRequest::default())
            .unwrap();
        assert!(transactions.data.is_empty());
    }

    #[test]
    fn bad_page_limit_is_rejected() {
        let ledger = ledger();
        let err = ledger
            .list_credit_events(EventFilter::default(), Order::Desc, &PageRequest::new(None, 0))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidArgument(_)));
    }

    #[test]
    fn feed_filters_by_direction() {
        let ledger = ledger();
        let owner = user("u1");
        ledger.recharge(&owner, dec!(10), "p-1", None).unwrap();
        ledger.spend(&spend_request(owner, dec!(1), None)).unwrap();

        let filter = EventFilter {
            direction: Some(Direction::Expense),
            ..EventFilter::default()
        };
        let page = ledger
            .list_credit_events(filter, Order::Asc, &PageRequest::default())
            .unwrap();
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.data[0].event_type, EventType::Spend);
    }

    #[test]
    fn transactions_carry_their_events() {
        let ledger = ledger();
        let owner = user("u1");
        ledger.recharge(&owner, dec!(10), "p-1", None).unwrap();
        ledger.spend(&spend_request(owner, dec!(3), Some("s-1"))).unwrap();
        let id = OwnerId::new("u1").unwrap();

        let all = ledger
            .list_transactions(&id, &[], None, &PageRequest::default())
            .unwrap();
        assert_eq!(all.data.len(), 2);
        assert!(all.data.iter().all(|row| row.event.is_some()));
        assert_eq!(all.data[0].transaction.tx_type, TransactionType::Spend);

        let topups = ledger
            .list_transactions(
                &id,
                &[TransactionType::Topup],
                Some(CreditDebit::Credit),
                &PageRequest::default(),
            )
            .unwrap();
        assert_eq!(topups.data.len(), 1);
        assert_eq!(
            topups.data[0].event.as_ref().map(|e| e.event_type),
            Some(EventType::Recharge)
        );
    }

    #[test]
    fn ownership_is_checked_when_claimed() {
        let ledger = ledger();
        ledger.recharge(&user("u1"), dec!(10), "p-1", None).unwrap();
        let event = ledger.fetch_event_by_upstream_tx_id("p-1").unwrap();

        let owner = OwnerId::new("u1").unwrap();
        let stranger = OwnerId::new("u2").unwrap();
        assert!(ledger.fetch_event_by_id(&event.id, None).is_ok());
        assert!(ledger.fetch_event_by_id(&event.id, Some(&owner)).is_ok());
        assert!(matches!(
            ledger.fetch_event_by_id(&event.id, Some(&stranger)),
            Err(LedgerError::Forbidden(_))
        ));
        assert!(matches!(
            ledger.update_event_note(&event.id, Some("x".into()), Some(&stranger)),
            Err(LedgerError::Forbidden(_))
        ));

        let updated = ledger
            .update_event_note(&event.id, Some("refunded".into()), Some(&owner))
            .unwrap();
        assert_eq!(updated.note.as_deref(), Some("refunded"));
        assert_eq!(
            ledger.fetch_event_by_id(&event.id, None).unwrap().note.as_deref(),
            Some("refunded")
        );
    }

    #[test]
    fn agent_fee_listing_and_statistics() {
        let ledger = ledger();
        let owner = user("u1");
        ledger.recharge(&owner, dec!(100), "p-1", None).unwrap();

        let mut paid = spend_request(owner.clone(), dec!(10), None);
        paid.fee_policy.agent_rate = dec!(0.5);
        ledger.spend(&paid).unwrap();
        ledger.spend(&spend_request(owner, dec!(30), None)).unwrap();

        let fees = ledger
            .list_fee_events_by_agent(&agent("agent-1"), EventFilter::default(), &PageRequest::default())
            .unwrap();
        assert_eq!(fees.data.len(), 1);
        assert_eq!(fees.data[0].fee_agent_amount, dec!(5));

        let stats = ledger
            .agent_statistics(&agent("agent-1"), Utc::now())
            .unwrap();
        assert_eq!(stats.total_income, dec!(40));
        assert_eq!(stats.net_income, dec!(5));
        assert_eq!(stats.permanent_income, dec!(40));
        assert_eq!(stats.permanent_profit, dec!(5));
        assert_eq!(stats.last_24h_income, dec!(40));
        assert_eq!(stats.avg_action_cost, dec!(20));
        assert_eq!(stats.min_action_cost, dec!(10));
        assert_eq!(stats.max_action_cost, dec!(30));
        assert_eq!(stats.balance, dec!(5));
    }

    #[test]
    fn statistics_without_income_are_zero() {
        let ledger = ledger();
        let stats = ledger
            .agent_statistics(&agent("idle"), Utc::now())
            .unwrap();
        assert_eq!(stats.total_income, Decimal::ZERO);
        assert_eq!(stats.permanent_profit, Decimal::ZERO);
        assert_eq!(stats.avg_action_cost, Decimal::ZERO);
    }

    #[test]
    fn oversized_amount_is_rejected_and_store_stays_usable() {
        let ledger = ledger();
        assert!(matches!(
            ledger.recharge(&user("u1"), Decimal::MAX, "a", None),
            Err(LedgerError::InvalidArgument(_))
        ));
        assert!(ledger.store().get_event_by_upstream_tx_id("a").unwrap().is_none());

        ledger.recharge(&user("u1"), MAX_AMOUNT, "b", None).unwrap();
        let account = ledger.recharge(&user("u1"), dec!(1), "c", None).unwrap();
        assert_eq!(account.credits, MAX_AMOUNT + dec!(1));

        let other = ledger.recharge(&user("u2"), dec!(5), "d", None).unwrap();
        assert_eq!(other.credits, dec!(5));
    }

    #[test]
    fn balance_overflow_is_rejected_without_writes() {
        let ledger = ledger();
        let owner = user("u1");
        ledger.recharge(&owner, dec!(1), "p-1", None).unwrap();

        let mut txn = ledger.store().begin().unwrap();
        let mut account = txn.account_by_owner(&owner).unwrap().unwrap();
        account.credits = Decimal::MAX;
        txn.put_account(&account).unwrap();
        txn.commit().unwrap();

        assert!(matches!(
            ledger.recharge(&owner, dec!(1), "p-2", None),
            Err(LedgerError::InvalidArgument(_))
        ));
        assert!(ledger.store().get_event_by_upstream_tx_id("p-2").unwrap().is_none());
        assert_eq!(ledger.get_or_create(&owner).unwrap().credits, Decimal::MAX);
        assert_eq!(ledger.recharge(&user("u2"), dec!(1), "p-3", None).unwrap().credits, dec!(1));
    }

    #[test]
    fn spend_key_of_another_operation_conflicts() {
        let ledger = ledger();
        let owner = user("u1");
        ledger.recharge(&owner, dec!(10), "k", None).unwrap();
        ledger.recharge(&user("u2"), dec!(10), "p-2", None).unwrap();
        ledger
            .spend(&spend_request(user("u2"), dec!(1), Some("s-2")))
            .unwrap();

        let err = ledger
            .spend(&spend_request(owner.clone(), dec!(4), Some("k")))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Conflict { upstream_tx_id } if upstream_tx_id == "k"));

        let err = ledger
            .spend(&spend_request(owner.clone(), dec!(4), Some("s-2")))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Conflict { .. }));

        let err = ledger
            .spend(&spend_request(user("u3"), dec!(4), Some("s-2")))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Conflict { .. }));

        assert_eq!(ledger.get_or_create(&owner).unwrap().credits, dec!(10));
    }

    /// A store whose transactions never see an existing idempotency key, as when two
    /// writers pass the check before either commits.
    struct KeyBlindStore(MemoryStore);

    struct KeyBlindTxn<'a>(Box<dyn StoreTxn + 'a>);

    impl StoreTxn for KeyBlindTxn<'_> {
        fn account(&mut self, id: &AccountId) -> crate::Result<Option<Account>> {
            self.0.account(id)
        }

        fn account_by_owner(&mut self, owner: &Owner) -> crate::Result<Option<Account>> {
            self.0.account_by_owner(owner)
        }

        fn event(&mut self, id: &EventId) -> crate::Result<Option<CreditEvent>> {
            self.0.event(id)
        }

        fn event_by_upstream_tx_id(&mut self, _: &str) -> crate::Result<Option<CreditEvent>> {
            Ok(None)
        }

        fn put_account(&mut self, account: &Account) -> crate::Result<()> {
            self.0.put_account(account)
        }

        fn insert_event(&mut self, event: &CreditEvent) -> crate::Result<()> {
            self.0.insert_event(event)
        }

        fn update_event(&mut self, event: &CreditEvent) -> crate::Result<()> {
            self.0.update_event(event)
        }

        fn insert_transaction(&mut self, transaction: &CreditTransaction) -> crate::Result<()> {
            self.0.insert_transaction(transaction)
        }

        fn claim_refill_epoch(
            &mut self,
            account_id: &AccountId,
            epoch: RefillEpoch,
        ) -> crate::Result<bool> {
            self.0.claim_refill_epoch(account_id, epoch)
        }

        fn commit(self: Box<Self>) -> crate::Result<()> {
            let Self(inner) = *self;
            inner.commit()
        }
    }

    impl Store for KeyBlindStore {
        fn begin(&self) -> crate::Result<Box<dyn StoreTxn + '_>> {
            Ok(Box::new(KeyBlindTxn(self.0.begin()?)))
        }

        fn get_account(&self, id: &AccountId) -> crate::Result<Option<Account>> {
            self.0.get_account(id)
        }

        fn find_account(&self, owner: &Owner) -> crate::Result<Option<Account>> {
            self.0.find_account(owner)
        }

        fn refillable_accounts(&self) -> crate::Result<Vec<AccountId>> {
            self.0.refillable_accounts()
        }

        fn get_event(&self, id: &EventId) -> crate::Result<Option<CreditEvent>> {
            self.0.get_event(id)
        }

        fn get_event_by_upstream_tx_id(
            &self,
            upstream_tx_id: &str,
        ) -> crate::Result<Option<CreditEvent>> {
            self.0.get_event_by_upstream_tx_id(upstream_tx_id)
        }

        fn get_events(&self, ids: &[EventId]) -> crate::Result<Vec<CreditEvent>> {
            self.0.get_events(ids)
        }

        fn scan_events(&self, query: &EventQuery) -> crate::Result<Vec<CreditEvent>> {
            self.0.scan_events(query)
        }

        fn get_event_transactions(
            &self,
            event_id: &EventId,
        ) -> crate::Result<Vec<CreditTransaction>> {
            self.0.get_event_transactions(event_id)
        }

        fn scan_transactions(
            &self,
            query: &TransactionQuery,
        ) -> crate::Result<Vec<CreditTransaction>> {
            self.0.scan_transactions(query)
        }

        fn get_task_watermark(&self, task: &str) -> crate::Result<Option<TaskWatermark>> {
            self.0.get_task_watermark(task)
        }

        fn put_task_watermark(&self, watermark: &TaskWatermark) -> crate::Result<()> {
            self.0.put_task_watermark(watermark)
        }
    }

    #[test]
    fn duplicate_key_rejected_at_commit_is_already_applied() {
        let ledger = Ledger::new(Arc::new(KeyBlindStore(MemoryStore::new())));
        let owner = user("u1");
        let id = OwnerId::new("u1").unwrap();
        let quota = QuotaUpdate {
            free_quota: Some(dec!(5)),
            refill_amount: Some(dec!(1)),
        };

        ledger.recharge(&owner, dec!(10), "p-1", None).unwrap();
        let again = ledger.recharge(&owner, dec!(10), "p-1", None).unwrap();
        assert_eq!(again.credits, dec!(10));

        let first = ledger
            .spend(&spend_request(owner.clone(), dec!(4), Some("s-1")))
            .unwrap();
        let second = ledger
            .spend(&spend_request(owner.clone(), dec!(4), Some("s-1")))
            .unwrap();
        assert!(!first.already_applied);
        assert!(second.already_applied);
        assert_eq!(second.event.id, first.event.id);
        assert_eq!(second.account.credits, dec!(6));

        ledger.update_daily_quota(&id, quota, "q-1", None).unwrap();
        let replayed = ledger.update_daily_quota(&id, quota, "q-1", None).unwrap();
        assert_eq!(replayed.free_quota, dec!(5));

        let account = ledger.get_or_create(&owner).unwrap();
        assert_eq!(account.credits, dec!(6));
        assert_eq!(account.total_income, dec!(10));
        assert_eq!(account.total_expense, dec!(4));

        let page = ledger
            .list_credit_events_by_user(&id, EventFilter::default(), &PageRequest::default())
            .unwrap();
        assert_eq!(page.data.len(), 3);
        let consumption = ledger
            .store()
            .find_account(&PlatformAccount::Consumption.owner())
            .unwrap()
            .unwrap();
        assert_eq!(consumption.credits, dec!(4));
    }
}
