//! Core types and ledger rules for the agent credit ledger.
//!
//! This crate holds everything that does not touch storage:
//!
//! - **Identifiers**: `AccountId`, `EventId`, `TransactionId`, `OwnerId`, `AgentId`
//! - **Accounts**: `Account`, its three credit pools and the spend order over them
//! - **Events and postings**: `CreditEvent`, `CreditTransaction`
//! - **Rules**: fee splitting, daily quota and refills, ownership checks
//! - **Reporting**: cursor pages and agent statistics
//! - **Skills**: typed skill configuration and per-user rate limits
//!
//! # Credit pools
//!
//! Every account holds free credits (refilled hourly up to a daily quota), reward credits
//! and purchased credits. A spend drains them in exactly that order and fails without
//! touching any pool when their sum cannot cover the cost.
//!
//! Amounts are `rust_decimal::Decimal` values with at most four fractional digits.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod amount;
pub mod credits;
pub mod error;
pub mod event;
pub mod fees;
pub mod ids;
pub mod page;
pub mod quota;
pub mod rate_limit;
pub mod skill;
pub mod stats;

pub use account::{authorize, Account, CreditType, Owner, OwnerType, PlatformAccount, PoolSplit};
pub use amount::{round_amount, AMOUNT_SCALE};
pub use credits::{check_balanced, CreditDebit, CreditTransaction, TransactionType};
pub use error::{LedgerError, Result};
pub use event::{CreditEvent, Direction, EventType, RewardType};
pub use fees::{FeeSplit, FeeSplitPolicy, ReferrerShare};
pub use ids::{AccountId, AgentId, EventId, IdError, OwnerId, TransactionId};
pub use page::{Order, Page, PageRequest, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
pub use quota::{refill_credit, QuotaDefaults, QuotaUpdate, RefillEpoch};
pub use rate_limit::RateLimiter;
pub use skill::{admit, CategoryConfig, KnownSkill, OpaqueSkill, SkillCall, SkillConfig, SkillState};
pub use stats::{permanent_profit, AgentStatistics, StatisticsBuilder};
