use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Directory for daily-rotated log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            log_dir: None,
        }
    }
}

/// Admin API authentication
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AdminConfig {
    #[serde(default)]
    pub tokens: Vec<AdminTokenConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdminTokenConfig {
    pub token: String,
    pub name: String,
    pub enabled: bool,
}

/// Request capture policy and writer tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptureConfig {
    /// HTTP methods that produce a log record (state-mutating verbs by default)
    #[serde(default = "default_tracked_methods")]
    pub tracked_methods: Vec<String>,

    /// URL substrings that are never logged, regardless of method.
    /// The admin log endpoints themselves must stay here, otherwise
    /// logging traffic produces more loggable traffic.
    #[serde(default = "default_excluded_paths")]
    pub excluded_paths: Vec<String>,

    /// Bounded channel size between the capture layer and the writer task
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            tracked_methods: default_tracked_methods(),
            excluded_paths: default_excluded_paths(),
            buffer_size: default_buffer_size(),
        }
    }
}

/// Log retention policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    /// Maximum age of a log record in hours
    #[serde(default = "default_retention_hours")]
    pub hours: u32,

    /// Hour of day (UTC, 0-23) the scheduled cleanup fires
    #[serde(default = "default_cleanup_hour")]
    pub cleanup_hour: u8,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            hours: default_retention_hours(),
            cleanup_hour: default_cleanup_hour(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_tracked_methods() -> Vec<String> {
    ["POST", "PUT", "PATCH", "DELETE"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

fn default_excluded_paths() -> Vec<String> {
    vec!["/admin/request-logs".to_string()]
}

fn default_buffer_size() -> usize {
    10000
}

fn default_retention_hours() -> u32 {
    24
}

fn default_cleanup_hour() -> u8 {
    2
}

fn default_database_path() -> String {
    "./data/request_logs.db".to_string()
}

/// Load configuration from a file (optional) plus environment overrides
///
/// Environment variables use the `REQLOG` prefix with `__` as the section
/// separator, e.g. `REQLOG__SERVER__PORT=9090`.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let config = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(config::Environment::with_prefix("REQLOG").separator("__"))
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    validate_config(&cfg)?;

    Ok(cfg)
}

fn validate_config(cfg: &Config) -> anyhow::Result<()> {
    // Validate at least one enabled admin token exists
    if !cfg.admin.tokens.iter().any(|t| t.enabled) {
        anyhow::bail!("At least one enabled admin token must be configured");
    }

    // Validate token names are present and unique
    let mut names = std::collections::HashSet::new();
    for token in &cfg.admin.tokens {
        if token.name.is_empty() {
            anyhow::bail!("Admin token name cannot be empty");
        }
        if token.enabled && token.token.is_empty() {
            anyhow::bail!("Admin token '{}' is enabled but has no token value", token.name);
        }
        if !names.insert(token.name.as_str()) {
            anyhow::bail!("Admin token name '{}' is duplicated", token.name);
        }
    }

    if cfg.capture.tracked_methods.is_empty() {
        anyhow::bail!("At least one tracked HTTP method must be configured");
    }
    for method in &cfg.capture.tracked_methods {
        if method.is_empty() {
            anyhow::bail!("Tracked HTTP method cannot be empty");
        }
    }

    if cfg.capture.buffer_size == 0 {
        anyhow::bail!("Capture buffer size must be >= 1");
    }

    if cfg.retention.hours == 0 {
        anyhow::bail!("Retention window must be >= 1 hour");
    }
    if cfg.retention.cleanup_hour > 23 {
        anyhow::bail!(
            "Cleanup hour must be between 0 and 23, got {}",
            cfg.retention.cleanup_hour
        );
    }

    Ok(())
}
