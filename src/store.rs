//! Request log store
//!
//! Owns the SQLite-backed `request_logs` table: a background writer task fed
//! by a bounded channel, the sanitizing record extraction, and the read-side
//! aggregate queries used by the admin API.

use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use sqlx::SqlitePool;
use std::net::IpAddr;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Placeholder stored in place of sensitive request body values
pub const REDACTION_MARKER: &str = "***REDACTED***";

/// Body fields whose values are never persisted
pub const SENSITIVE_FIELDS: [&str; 5] = ["password", "token", "secret", "apiKey", "refreshToken"];

/// Request snapshot handed from the capture layer to the extraction step.
///
/// Deliberately framework-free: only the fields extraction needs, so the
/// store never touches a live HTTP request type.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub method: String,
    /// Original URL including the query string
    pub original_url: String,
    pub forwarded_for: Option<String>,
    pub real_ip: Option<String>,
    pub peer_addr: Option<IpAddr>,
    pub user_agent: Option<String>,
    pub user_id: Option<String>,
    pub raw_query: Option<String>,
}

/// One request's worth of log data, ready to be persisted
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub method: String,
    pub path: String,
    pub status_code: u16,
    pub response_time_ms: i64,
    pub user_id: Option<String>,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub request_body: Option<String>,
    pub query_params: Option<String>,
    pub error_message: Option<String>,
}

/// Persisted log record as returned by the admin listing endpoints
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub id: i64,
    pub method: String,
    pub path: String,
    pub status_code: i64,
    #[serde(rename = "responseTime")]
    pub response_time_ms: i64,
    pub user_id: Option<String>,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub request_body: Option<String>,
    pub query_params: Option<String>,
    pub error_message: Option<String>,
    #[serde(serialize_with = "serialize_millis")]
    pub created_at: i64,
}

/// Aggregate statistics over the whole log population
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogStatistics {
    pub total: i64,
    pub today: i64,
    pub errors: i64,
    pub average_response_time: i64,
}

fn serialize_millis<S: serde::Serializer>(millis: &i64, serializer: S) -> Result<S::Ok, S::Error> {
    let ts = chrono::DateTime::from_timestamp_millis(*millis).unwrap_or(chrono::DateTime::UNIX_EPOCH);
    serializer.serialize_str(&ts.to_rfc3339())
}

const SELECT_COLUMNS: &str = "id, method, path, status_code, response_time_ms, user_id, \
     ip_address, user_agent, request_body, query_params, error_message, created_at";

/// Async request log store with channel-based writes
///
/// Uses an MPSC channel to decouple request handling from database writes:
/// `submit` never blocks and never fails the caller. Delivery is best-effort
/// at-most-once; a record dropped on a full buffer or failed insert is logged
/// to diagnostics and forgotten, never retried.
#[derive(Clone)]
pub struct RequestLogStore {
    tx: mpsc::Sender<LogEvent>,
    pool: SqlitePool,
}

impl RequestLogStore {
    /// Create a new store with a background writer task
    pub fn new(pool: SqlitePool, buffer_size: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<LogEvent>(buffer_size);
        let writer_pool = pool.clone();

        // Spawn background writer task with panic logging
        tokio::spawn(async move {
            let result = std::panic::AssertUnwindSafe(async {
                while let Some(event) = rx.recv().await {
                    if let Err(e) = Self::write_record(&writer_pool, &event).await {
                        tracing::error!(
                            method = %event.method,
                            path = %event.path,
                            error = %e,
                            "Failed to persist request log"
                        );
                    }
                }
            })
            .catch_unwind()
            .await;
            match result {
                Ok(()) => tracing::warn!("Request log writer exited unexpectedly"),
                Err(e) => tracing::error!(panic = ?e, "Request log writer panicked"),
            }
        });

        Self { tx, pool }
    }

    /// Queue a log event for persistence (non-blocking, fire-and-forget)
    pub fn submit(&self, event: LogEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::warn!(
                    path = %event.path,
                    "Request log buffer full, dropping record"
                );
            }
            Err(TrySendError::Closed(event)) => {
                tracing::error!(
                    path = %event.path,
                    "Request log writer is gone, dropping record"
                );
            }
        }
    }

    /// Write a single record. `created_at` and `date` are assigned here, at
    /// persistence time.
    async fn write_record(pool: &SqlitePool, event: &LogEvent) -> Result<(), sqlx::Error> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO request_logs (
                method, path, status_code, response_time_ms, user_id,
                ip_address, user_agent, request_body, query_params,
                error_message, created_at, date
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&event.method)
        .bind(&event.path)
        .bind(event.status_code as i64)
        .bind(event.response_time_ms)
        .bind(&event.user_id)
        .bind(&event.ip_address)
        .bind(&event.user_agent)
        .bind(&event.request_body)
        .bind(&event.query_params)
        .bind(&event.error_message)
        .bind(now.timestamp_millis())
        .bind(now.format("%Y-%m-%d").to_string())
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Page of records, newest first, plus total count
    pub async fn get_request_logs(
        &self,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<LogRecord>, i64), sqlx::Error> {
        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM request_logs")
            .fetch_one(&self.pool)
            .await?;

        let offset = (page.saturating_sub(1) as i64) * limit as i64;
        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM request_logs \
             ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2"
        );
        let logs = sqlx::query_as::<_, LogRecord>(&query)
            .bind(limit as i64)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok((logs, total))
    }

    /// Page of one user's records, newest first, plus total count
    pub async fn get_user_request_logs(
        &self,
        user_id: &str,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<LogRecord>, i64), sqlx::Error> {
        let total =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM request_logs WHERE user_id = ?1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;

        let offset = (page.saturating_sub(1) as i64) * limit as i64;
        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM request_logs WHERE user_id = ?1 \
             ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3"
        );
        let logs = sqlx::query_as::<_, LogRecord>(&query)
            .bind(user_id)
            .bind(limit as i64)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok((logs, total))
    }

    /// Aggregate statistics: total count, today's count, error count
    /// (status >= 400), mean response time rounded to the nearest ms
    pub async fn get_statistics(&self) -> Result<LogStatistics, sqlx::Error> {
        let (total, avg) = sqlx::query_as::<_, (i64, f64)>(
            "SELECT COUNT(*), COALESCE(AVG(response_time_ms), 0.0) FROM request_logs",
        )
        .fetch_one(&self.pool)
        .await?;

        let today = self.count_today().await?;

        let errors =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM request_logs WHERE status_code >= 400")
                .fetch_one(&self.pool)
                .await?;

        Ok(LogStatistics {
            total,
            today,
            errors,
            average_response_time: avg.round() as i64,
        })
    }

    pub async fn count_total(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM request_logs")
            .fetch_one(&self.pool)
            .await
    }

    pub async fn count_today(&self) -> Result<i64, sqlx::Error> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM request_logs WHERE date = ?1")
            .bind(&today)
            .fetch_one(&self.pool)
            .await
    }

    /// Delete records strictly older than `now - hours`.
    ///
    /// A record exactly at the cutoff is retained. Storage errors are logged
    /// and reported as 0 deleted; cleanup must never propagate a failure to
    /// its caller.
    pub async fn delete_old_logs(&self, hours: u32) -> u64 {
        match self.delete_old_logs_inner(hours).await {
            Ok(deleted) => deleted,
            Err(e) => {
                tracing::error!(error = %e, hours, "Failed to delete expired request logs");
                0
            }
        }
    }

    async fn delete_old_logs_inner(&self, hours: u32) -> Result<u64, sqlx::Error> {
        let cutoff = (Utc::now() - chrono::Duration::hours(hours as i64)).timestamp_millis();

        let matching =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM request_logs WHERE created_at < ?1")
                .bind(cutoff)
                .fetch_one(&self.pool)
                .await?;
        if matching == 0 {
            tracing::debug!(hours, "No request logs past retention window");
            return Ok(0);
        }

        let result = sqlx::query("DELETE FROM request_logs WHERE created_at < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected();
        tracing::info!(deleted, matching, hours, "Deleted expired request logs");
        Ok(deleted)
    }

    /// Liveness probe against the underlying database
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Open the SQLite pool, creating the database file and its parent
/// directory if needed
pub async fn open_pool(database_path: &str) -> anyhow::Result<SqlitePool> {
    if let Some(parent) = std::path::Path::new(database_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(database_path)
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

    let pool = SqlitePool::connect_with(options)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

    Ok(pool)
}

/// Build a log event from a request snapshot and its response outcome.
///
/// Pure transformation: no I/O, no failure modes that reach the caller.
/// Body and query fields come back `None` rather than empty-object noise.
pub fn extract_log_data(
    ctx: &RequestContext,
    status_code: u16,
    response_time_ms: i64,
    body: &[u8],
    error_message: Option<String>,
) -> LogEvent {
    LogEvent {
        method: ctx.method.clone(),
        path: ctx.original_url.clone(),
        status_code,
        response_time_ms,
        user_id: ctx.user_id.clone(),
        ip_address: client_ip(ctx),
        user_agent: ctx.user_agent.clone(),
        request_body: render_body(body),
        query_params: render_query(ctx.raw_query.as_deref()),
        error_message,
    }
}

/// Best-effort client IP: forwarded-for first hop, then real-ip, then the
/// socket peer, then the "unknown" sentinel
pub fn client_ip(ctx: &RequestContext) -> String {
    if let Some(forwarded) = &ctx.forwarded_for {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real_ip) = &ctx.real_ip {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    if let Some(addr) = ctx.peer_addr {
        return addr.to_string();
    }

    "unknown".to_string()
}

/// Replace sensitive top-level body fields with the redaction marker.
///
/// Field presence is preserved so a redacted body still shows which fields
/// the client sent.
pub fn sanitize_body(mut value: serde_json::Value) -> serde_json::Value {
    if let Some(map) = value.as_object_mut() {
        for field in SENSITIVE_FIELDS {
            if let Some(slot) = map.get_mut(field) {
                *slot = serde_json::Value::String(REDACTION_MARKER.to_string());
            }
        }
    }
    value
}

fn render_body(body: &[u8]) -> Option<String> {
    if body.is_empty() {
        return None;
    }

    let value: serde_json::Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(error = %e, "Request body is not valid JSON, skipping body capture");
            return None;
        }
    };

    if let serde_json::Value::Object(map) = &value {
        if map.is_empty() {
            return None;
        }
    }

    match serde_json::to_string(&sanitize_body(value)) {
        Ok(rendered) => Some(rendered),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize request body, skipping body capture");
            None
        }
    }
}

fn render_query(raw_query: Option<&str>) -> Option<String> {
    let raw = raw_query?;
    if raw.is_empty() {
        return None;
    }

    let mut params = serde_json::Map::new();
    for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
        params.insert(key.into_owned(), serde_json::Value::String(value.into_owned()));
    }
    if params.is_empty() {
        return None;
    }

    serde_json::to_string(&serde_json::Value::Object(params)).ok()
}
