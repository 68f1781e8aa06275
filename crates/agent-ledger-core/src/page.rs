//! Cursor pagination.
//!
//! Listings are ordered by time-ordered ids, so the last id of a page is all a caller
//! needs to resume. A page that returns nothing hands back the caller's own cursor, which
//! lets monitoring feeds keep polling with it until new rows appear.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};

/// Smallest accepted page size.
pub const MIN_PAGE_LIMIT: usize = 1;

/// Largest accepted page size.
pub const MAX_PAGE_LIMIT: usize = 100;

/// Page size used when the caller does not give one.
pub const DEFAULT_PAGE_LIMIT: usize = 20;

/// Sort order of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Order {
    /// Oldest first.
    Asc,
    /// Newest first.
    #[default]
    Desc,
}

/// A request for one page of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Id of the last item seen, if any.
    #[serde(default)]
    pub cursor: Option<String>,

    /// Maximum number of items to return.
    #[serde(default = "default_limit")]
    pub limit: usize,
}

const fn default_limit() -> usize {
    DEFAULT_PAGE_LIMIT
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            cursor: None,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl PageRequest {
    /// Create a request.
    #[must_use]
    pub fn new(cursor: Option<String>, limit: usize) -> Self {
        Self { cursor, limit }
    }

    /// Validate the limit and parse the cursor as the listing's id type.
    ///
    /// An empty cursor string is treated as no cursor.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the limit is out of range or the cursor does not parse.
    pub fn parse<Id: FromStr>(&self) -> Result<Option<Id>> {
        if !(MIN_PAGE_LIMIT..=MAX_PAGE_LIMIT).contains(&self.limit) {
            return Err(LedgerError::invalid(format!(
                "limit must be between {MIN_PAGE_LIMIT} and {MAX_PAGE_LIMIT}"
            )));
        }
        match self.cursor.as_deref() {
            None | Some("") => Ok(None),
            Some(cursor) => cursor
                .parse()
                .map(Some)
                .map_err(|_| LedgerError::invalid(format!("invalid cursor: {cursor}"))),
        }
    }
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Items of this page, in listing order.
    pub data: Vec<T>,

    /// Cursor to pass for the next page.
    pub next_cursor: Option<String>,

    /// Whether more items were available when this page was read.
    pub has_more: bool,
}

impl<T> Page<T> {
    /// Build a page from up to `limit + 1` rows read in listing order.
    ///
    /// The extra row only signals `has_more` and is dropped.
    pub fn from_rows<F>(mut rows: Vec<T>, request: &PageRequest, id_of: F) -> Self
    where
        F: Fn(&T) -> String,
    {
        let has_more = rows.len() > request.limit;
        rows.truncate(request.limit);
        let next_cursor = rows
            .last()
            .map(id_of)
            .or_else(|| request.cursor.clone().filter(|c| !c.is_empty()));
        Self {
            data: rows,
            next_cursor,
            has_more,
        }
    }

    /// An empty page that keeps the caller's cursor.
    #[must_use]
    pub fn empty(request: &PageRequest) -> Self {
        Self {
            data: Vec::new(),
            next_cursor: request.cursor.clone().filter(|c| !c.is_empty()),
            has_more: false,
        }
    }

    /// Transform the items, keeping the cursor.
    pub fn map<U, F>(self, f: F) -> Page<U>
    where
        F: FnMut(T) -> U,
    {
        Page {
            data: self.data.into_iter().map(f).collect(),
            next_cursor: self.next_cursor,
            has_more: self.has_more,
        }
    }
}
