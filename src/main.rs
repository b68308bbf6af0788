use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use reqlog::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = cli::Cli::parse();

    // Initialize tracing/logging early, except for the start command where
    // server.rs installs the subscriber with the configured format
    let needs_early_tracing = !matches!(args.get_command(), cli::Commands::Start);
    if needs_early_tracing {
        init_tracing();
    }

    // Dispatch to appropriate command handler
    match args.get_command() {
        cli::Commands::Start => {
            commands::start::execute(&args.config).await?;
        }
        cli::Commands::Stats => {
            commands::stats::execute(&args.config).await?;
        }
        cli::Commands::Cleanup { hours } => {
            commands::cleanup::execute(&args.config, hours).await?;
        }
        cli::Commands::Test => {
            commands::test::execute(&args.config)?;
        }
        cli::Commands::Version => {
            println!("reqlog v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
