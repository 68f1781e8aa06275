//! Fixed window rate limiting for skill calls.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{LedgerError, Result};

/// Stale windows are swept once the table grows past this many keys.
const SWEEP_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    expires_at: Instant,
}

/// Per-user counters keyed `rate_limit:{key}:{user_id}`.
///
/// The first hit of a key opens a window of the configured length; hits beyond the limit
/// inside that window are rejected until it expires.
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    /// Create an empty limiter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one hit for `user_id` under `key`.
    ///
    /// Callers without a user id are never limited.
    ///
    /// # Errors
    ///
    /// Returns `RateLimited` when the hit exceeds `limit` within the window.
    pub fn check(&self, key: &str, user_id: Option<&str>, limit: u32, minutes: u32) -> Result<()> {
        self.check_at(key, user_id, limit, minutes, Instant::now())
    }

    /// [`RateLimiter::check`] with an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns `RateLimited` when the hit exceeds `limit` within the window.
    pub fn check_at(
        &self,
        key: &str,
        user_id: Option<&str>,
        limit: u32,
        minutes: u32,
        now: Instant,
    ) -> Result<()> {
        let Some(user_id) = user_id.filter(|u| !u.is_empty()) else {
            return Ok(());
        };

        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        if windows.len() > SWEEP_THRESHOLD {
            windows.retain(|_, w| w.expires_at > now);
        }

        let window = windows
            .entry(format!("rate_limit:{key}:{user_id}"))
            .or_insert(Window {
                count: 0,
                expires_at: now,
            });
        if window.expires_at <= now {
            window.count = 0;
            window.expires_at = now + Duration::from_secs(u64::from(minutes) * 60);
        }
        window.count = window.count.saturating_add(1);

        if window.count > limit {
            tracing::debug!(key, user_id, count = window.count, limit, "Rate limit hit");
            return Err(LedgerError::RateLimited {
                key: key.to_string(),
            });
        }
        Ok(())
    }
}
