use anyhow::Result;
use chrono::Utc;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use sqlx::{FromRow, SqlitePool};
use std::path::Path;
use tracing::info;

use reqlog::cleanup::next_cleanup_at;
use reqlog::{config, store};

/// Per-method statistics row from database
#[derive(Debug, FromRow)]
struct MethodStatsRow {
    method: String,
    requests: i64,
    errors: i64,
    avg_response_time: f64,
}

/// Execute the stats command
///
/// Displays request log statistics and retention status
pub async fn execute(config_path: &Path) -> Result<()> {
    println!("Request Log Statistics");
    println!("======================\n");

    info!("Loading configuration");
    let cfg = config::load_config(config_path)?;

    let pool = match connect_to_database(&cfg).await {
        Ok(pool) => pool,
        Err(e) => {
            println!("Database not available ({})", e);
            return Ok(());
        }
    };

    display_summary(&pool, &cfg).await?;
    display_method_breakdown(&pool).await?;

    Ok(())
}

/// Connect to the request log database without creating it
async fn connect_to_database(cfg: &config::Config) -> Result<SqlitePool> {
    if !Path::new(&cfg.database.path).exists() {
        anyhow::bail!("no database at {}", cfg.database.path);
    }
    let pool = store::open_pool(&cfg.database.path).await?;
    Ok(pool)
}

/// Display the summary section: totals plus retention status
async fn display_summary(pool: &SqlitePool, cfg: &config::Config) -> Result<()> {
    let today = Utc::now().format("%Y-%m-%d").to_string();

    let (total, avg) = sqlx::query_as::<_, (i64, f64)>(
        "SELECT COUNT(*), COALESCE(AVG(response_time_ms), 0.0) FROM request_logs",
    )
    .fetch_one(pool)
    .await?;

    let today_count =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM request_logs WHERE date = ?1")
            .bind(&today)
            .fetch_one(pool)
            .await?;

    let errors =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM request_logs WHERE status_code >= 400")
            .fetch_one(pool)
            .await?;

    println!("Summary:");
    println!("  Total Records:     {}", total);
    println!("  Today:             {}", today_count);
    println!("  Errors (>=400):    {}", errors);
    println!("  Avg Response Time: {} ms", avg.round() as i64);
    println!();

    println!("Retention:");
    println!("  Window:            {} hours", cfg.retention.hours);
    println!(
        "  Next Cleanup:      {}",
        next_cleanup_at(Utc::now(), cfg.retention.cleanup_hour).to_rfc3339()
    );
    println!();

    Ok(())
}

/// Display per-method statistics table
async fn display_method_breakdown(pool: &SqlitePool) -> Result<()> {
    let stats = sqlx::query_as::<_, MethodStatsRow>(
        "SELECT
            method,
            COUNT(*) as requests,
            COALESCE(SUM(status_code >= 400), 0) as errors,
            COALESCE(AVG(response_time_ms), 0.0) as avg_response_time
         FROM request_logs
         GROUP BY method
         ORDER BY requests DESC",
    )
    .fetch_all(pool)
    .await?;

    if stats.is_empty() {
        println!("Per-Method Breakdown: No data available");
        return Ok(());
    }

    println!("Per-Method Breakdown:");
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("METHOD").fg(Color::Cyan),
        Cell::new("REQUESTS").fg(Color::Cyan),
        Cell::new("ERRORS").fg(Color::Cyan),
        Cell::new("AVG MS").fg(Color::Cyan),
    ]);

    for row in &stats {
        let error_color = if row.errors > 0 {
            Color::Red
        } else {
            Color::Green
        };
        table.add_row(vec![
            Cell::new(&row.method),
            Cell::new(row.requests),
            Cell::new(row.errors).fg(error_color),
            Cell::new(row.avg_response_time.round() as i64),
        ]);
    }

    println!("{table}");
    Ok(())
}
