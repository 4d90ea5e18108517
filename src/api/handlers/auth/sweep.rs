//! Background removal of expired sessions and closed rate-limit windows.
//!
//! Sessions that are presented after expiry are deleted by the resolver; this
//! covers the ones nobody presents again and the per-key counter rows.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{debug, error};

use super::storage::{RateCache, SessionStore, bounded};

/// Rows removed by one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions: u64,
    pub rate_windows: u64,
}

/// Purge expired rows once. Both stores are always attempted.
///
/// # Errors
/// Returns the first store error after both purges ran.
pub async fn sweep_expired(
    sessions: &dyn SessionStore,
    rates: &dyn RateCache,
    timeout: Duration,
    now: DateTime<Utc>,
) -> Result<SweepReport> {
    let purged_sessions = bounded(timeout, "session purge", sessions.purge_expired(now)).await;
    let purged_windows = bounded(timeout, "rate window purge", rates.purge_expired()).await;

    Ok(SweepReport {
        sessions: purged_sessions?,
        rate_windows: purged_windows?,
    })
}

/// Spawn a task that sweeps every `interval` for the life of the process.
pub fn spawn_expiry_sweeper(
    sessions: Arc<dyn SessionStore>,
    rates: Arc<dyn RateCache>,
    interval: Duration,
    timeout: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            sleep(interval).await;

            match sweep_expired(sessions.as_ref(), rates.as_ref(), timeout, Utc::now()).await {
                Ok(report) => debug!(
                    sessions = report.sessions,
                    rate_windows = report.rate_windows,
                    "expiry sweep finished"
                ),
                Err(err) => error!("expiry sweep failed: {err:#}"),
            }
        }
    })
}
