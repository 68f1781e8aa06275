//! API handlers.

use std::str::FromStr;

use serde::Deserialize;

use agent_ledger_core::{IdError, LedgerError, PageRequest, DEFAULT_PAGE_LIMIT};

use crate::error::ApiError;

pub mod accounts;
pub mod events;
pub mod health;
pub mod skills;
pub mod spend;
pub mod transactions;

/// Cursor pagination query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    /// Id of the last item seen.
    pub cursor: Option<String>,
    /// Maximum number of items (1-100, default 20).
    pub limit: Option<usize>,
}

impl PageQuery {
    /// Convert into a ledger page request.
    #[must_use]
    pub fn into_request(self) -> PageRequest {
        PageRequest::new(self.cursor, self.limit.unwrap_or(DEFAULT_PAGE_LIMIT))
    }
}

/// Parse an identifier taken from a path or query string.
pub(crate) fn parse_id<T>(raw: &str) -> Result<T, ApiError>
where
    T: FromStr<Err = IdError>,
{
    raw.parse::<T>()
        .map_err(|e| ApiError::from(LedgerError::from(e)))
}
