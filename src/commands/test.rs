use anyhow::Result;
use std::path::Path;
use tracing::info;

use reqlog::config;

/// Execute the test command
///
/// This validates the configuration file without starting the server
pub fn execute(config_path: &Path) -> Result<()> {
    println!("Testing configuration...");
    info!("Loading and validating configuration");

    // Load configuration (this will validate it)
    let cfg = config::load_config(config_path)?;

    println!("✓ Configuration test successful");
    println!();

    println!("Configuration Summary:");
    println!("  Server:       {}:{}", cfg.server.host, cfg.server.port);
    println!("  Log Level:    {}", cfg.server.log_level);
    println!("  Log Format:   {}", cfg.server.log_format);
    println!("  Database:     {}", cfg.database.path);
    println!();

    println!("  Admin Tokens: {}", cfg.admin.tokens.len());
    for (idx, token_cfg) in cfg.admin.tokens.iter().enumerate() {
        let status = if token_cfg.enabled {
            "enabled"
        } else {
            "disabled"
        };
        println!("    {}. {} ({})", idx + 1, token_cfg.name, status);
    }
    println!();

    println!(
        "  Tracked Methods: {}",
        cfg.capture.tracked_methods.join(", ")
    );
    println!(
        "  Excluded Paths:  {}",
        cfg.capture.excluded_paths.join(", ")
    );
    println!(
        "  Retention:       {}h, cleanup at {:02}:00 UTC",
        cfg.retention.hours, cfg.retention.cleanup_hour
    );

    Ok(())
}
