use anyhow::Result;
use std::path::Path;

use reqlog::{config, server};

/// Execute the start command
///
/// Loads and validates configuration, then runs the server until shutdown.
pub async fn execute(config_path: &Path) -> Result<()> {
    let cfg = config::load_config(config_path)?;
    server::start_server(cfg, config_path).await
}
