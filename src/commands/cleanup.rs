use anyhow::Result;
use std::path::Path;
use tracing::info;

use reqlog::store::{self, RequestLogStore};
use reqlog::config;

/// Execute the cleanup command
///
/// Runs the same retention delete as the scheduled job, once, from the
/// terminal.
pub async fn execute(config_path: &Path, hours: Option<u32>) -> Result<()> {
    let cfg = config::load_config(config_path)?;
    let hours = hours.unwrap_or(cfg.retention.hours);

    info!(hours, "Running manual request log cleanup");

    let pool = store::open_pool(&cfg.database.path).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    let log_store = RequestLogStore::new(pool, cfg.capture.buffer_size);

    let deleted = log_store.delete_old_logs(hours).await;
    println!(
        "Cleanup completed: {} logs deleted (retention window {}h)",
        deleted, hours
    );

    Ok(())
}
