//! Agent Ledger HTTP API Service.
//!
//! This crate provides the HTTP API for the agent credit ledger, including:
//!
//! - Credit administration (recharge, reward, daily quota, refill)
//! - Event and transaction history with cursor pagination
//! - The billing hook charging users for paid agent actions
//! - Skill admission with per-user rate limits
//!
//! # Authentication
//!
//! The service supports two authentication methods:
//!
//! 1. **Admin bearer tokens** - HS256 JWTs for the credit administration routes, enforced
//!    when `ADMIN_AUTH_ENABLED=true`
//! 2. **Service API keys** - For the agent runtime (`x-api-key`)

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers that never await still need to be async

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod refill;
pub mod routes;
pub mod state;

pub use config::{ServiceConfig, StoreBackend};
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
