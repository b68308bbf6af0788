//! Scheduled log retention
//!
//! One daily cleanup run at a fixed wall-clock hour, plus the shared
//! next-run computation used by the admin cleanup-stats endpoint. The
//! deletion itself is idempotent, so an overlapping or repeated run is
//! harmless.

use crate::config::Config;
use crate::store::RequestLogStore;
use arc_swap::ArcSwap;
use chrono::{DateTime, NaiveTime, Timelike, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// Start the cleanup task
///
/// Ticks hourly and runs the retention delete when the current UTC hour
/// matches the configured cleanup hour. A failed run is logged and the task
/// waits for the next natural schedule point; it is never retried early.
pub fn start_cleanup_task(
    store: RequestLogStore,
    config: Arc<ArcSwap<Config>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval(Duration::from_secs(3600));

        loop {
            interval.tick().await;

            let retention = config.load().retention.clone();
            if Utc::now().hour() != retention.cleanup_hour as u32 {
                continue;
            }

            tracing::info!(
                retention_hours = retention.hours,
                "Starting scheduled request log cleanup"
            );
            let deleted = store.delete_old_logs(retention.hours).await;
            tracing::info!(deleted, "Scheduled request log cleanup finished");
        }
    })
}

/// Next scheduled cleanup run: today at the cleanup hour if that is still
/// ahead, otherwise tomorrow at the cleanup hour
pub fn next_cleanup_at(now: DateTime<Utc>, cleanup_hour: u8) -> DateTime<Utc> {
    let run_time = NaiveTime::from_hms_opt(cleanup_hour as u32, 0, 0).unwrap_or(NaiveTime::MIN);
    let candidate = now.date_naive().and_time(run_time).and_utc();
    if candidate > now {
        candidate
    } else {
        candidate + chrono::Duration::days(1)
    }
}
