//! Agent Ledger Client SDK.
//!
//! Agent runtimes use this crate to bill paid actions and to check skill admission;
//! admin tooling uses it for recharges, rewards and the event feed.
//!
//! # Example
//!
//! ```no_run
//! use agent_ledger_client::{AgentLedgerClient, SpendRequest};
//! use rust_decimal::Decimal;
//!
//! # async fn example() -> Result<(), agent_ledger_client::ClientError> {
//! let client = AgentLedgerClient::new("http://agent-ledger:8080", "your-service-api-key")?;
//!
//! let receipt = client
//!     .spend(&SpendRequest {
//!         user_id: "user-1".to_string(),
//!         agent_id: "agent-1".to_string(),
//!         amount: Decimal::new(150, 2),
//!         agent_fee_rate: Decimal::new(2, 1),
//!         upstream_tx_id: Some("run-42".to_string()),
//!         ..SpendRequest::default()
//!     })
//!     .await?;
//!
//! println!("Remaining: {} credits", receipt.account.total_balance());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod error;
mod types;

pub use client::{AgentLedgerClient, ClientOptions};
pub use error::ClientError;
pub use types::*;
