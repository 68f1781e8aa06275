//! Hourly refill of free credits.
//!
//! The worker ticks every `REFILL_INTERVAL_SECONDS` and refills every account once per
//! UTC hour. The last completed hour is persisted as a task watermark, so a restart
//! resumes from storage. Running the same hour twice is harmless because each account
//! claims its refill epoch atomically with the credit.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use agent_ledger_core::{RefillEpoch, Result};
use agent_ledger_store::{Ledger, RefillSummary, TaskWatermark};

use crate::state::AppState;

/// Watermark key of the refill task.
pub const REFILL_TASK: &str = "quota_refill";

/// Refill all accounts for the hour containing `now`, unless that hour already ran.
///
/// Returns `None` when the watermark is already at or past the hour. The watermark is
/// only advanced when every account was refilled, so failures are retried next tick.
///
/// # Errors
///
/// Returns an error if the watermark or the account list cannot be read.
pub fn refill_if_due(ledger: &Ledger, now: DateTime<Utc>) -> Result<Option<RefillSummary>> {
    let epoch = RefillEpoch::from_datetime(now);
    let store = ledger.store();

    if let Some(watermark) = store.get_task_watermark(REFILL_TASK)? {
        if watermark.epoch >= epoch {
            tracing::debug!(%epoch, last = %watermark.epoch, "Refill already ran this hour");
            return Ok(None);
        }
    }

    let summary = ledger.refill_all(epoch)?;
    if summary.failed == 0 {
        store.put_task_watermark(&TaskWatermark {
            task: REFILL_TASK.to_string(),
            epoch,
            updated_at: now,
        })?;
    } else {
        tracing::warn!(%epoch, failed = summary.failed, "Refill incomplete, will retry");
    }
    Ok(Some(summary))
}

/// Run the refill loop until `shutdown` flips to `true`.
pub async fn run(state: Arc<AppState>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    tracing::info!(interval_secs = interval.as_secs(), "Refill worker started");

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("Refill worker stopping");
                break;
            }
            _ = ticker.tick() => {
                match state.run(|ledger| refill_if_due(ledger, Utc::now())).await {
                    Ok(Some(summary)) => {
                        tracing::info!(refilled = summary.refilled, "Refill tick finished");
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "Refill tick failed");
                    }
                }
            }
        }
    }
}

/// Start the worker if an interval is configured.
#[must_use]
pub fn spawn(
    state: Arc<AppState>,
    shutdown: watch::Receiver<bool>,
) -> Option<tokio::task::JoinHandle<()>> {
    let seconds = state.config.refill_interval_seconds;
    if seconds == 0 {
        tracing::info!("Refill worker disabled");
        return None;
    }
    Some(tokio::spawn(run(state, Duration::from_secs(seconds), shutdown)))
}
