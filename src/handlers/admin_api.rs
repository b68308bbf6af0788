//! Admin HTTP API handlers
//!
//! RESTful surface over the request log store:
//! - paginated log listing, global and per-user
//! - aggregate statistics
//! - cleanup stats and the manual cleanup trigger

use crate::auth;
use crate::cleanup::next_cleanup_at;
use crate::config::Config;
use crate::error::AppError;
use crate::store::{LogRecord, LogStatistics, RequestLogStore};
use arc_swap::ArcSwap;
use axum::extract::{Query, State};
use axum::response::Json;
use axum::routing::{get, post};
use axum::{middleware, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const DEFAULT_PAGE: u32 = 1;
const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 500;

/// State shared across all admin API handlers
#[derive(Clone)]
pub struct AdminState {
    pub store: RequestLogStore,
    pub config: Arc<ArcSwap<Config>>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

#[derive(Debug, Deserialize)]
pub struct UserLogsQuery {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_page() -> u32 {
    DEFAULT_PAGE
}

fn default_limit() -> u32 {
    DEFAULT_LIMIT
}

/// Paginated listing envelope
#[derive(Debug, Serialize)]
pub struct PagedLogs {
    pub logs: Vec<LogRecord>,
    pub total: i64,
    pub count: usize,
    pub page: u32,
    pub limit: u32,
    pub total_pages: i64,
    pub has_next: bool,
    pub has_previous: bool,
}

fn paged(logs: Vec<LogRecord>, total: i64, page: u32, limit: u32) -> PagedLogs {
    let total_pages = if total == 0 {
        0
    } else {
        (total + limit as i64 - 1) / limit as i64
    };
    PagedLogs {
        count: logs.len(),
        logs,
        total,
        page,
        limit,
        total_pages,
        has_next: (page as i64) < total_pages,
        has_previous: page > 1,
    }
}

fn normalize(page: u32, limit: u32) -> (u32, u32) {
    (page.max(1), limit.clamp(1, MAX_LIMIT))
}

/// GET /admin/request-logs - Paginated log listing, newest first
pub async fn list_request_logs(
    State(state): State<AdminState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<PagedLogs>, AppError> {
    let (page, limit) = normalize(query.page, query.limit);
    let (logs, total) = state.store.get_request_logs(page, limit).await?;
    Ok(Json(paged(logs, total, page, limit)))
}

/// GET /admin/request-logs/user?userId= - One user's logs
///
/// 400 when `userId` is missing.
pub async fn list_user_request_logs(
    State(state): State<AdminState>,
    Query(query): Query<UserLogsQuery>,
) -> Result<Json<PagedLogs>, AppError> {
    let user_id = query
        .user_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::BadRequest("userId query parameter is required".to_string()))?;

    let (page, limit) = normalize(query.page, query.limit);
    let (logs, total) = state
        .store
        .get_user_request_logs(&user_id, page, limit)
        .await?;
    Ok(Json(paged(logs, total, page, limit)))
}

/// GET /admin/request-logs/statistics - Aggregate statistics
pub async fn get_statistics(
    State(state): State<AdminState>,
) -> Result<Json<LogStatistics>, AppError> {
    let stats = state.store.get_statistics().await?;
    Ok(Json(stats))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupStats {
    pub total_logs: i64,
    pub today_logs: i64,
    pub retention_hours: u32,
    /// ISO-8601 timestamp of the next scheduled run
    pub next_cleanup: String,
}

/// GET /admin/request-logs/cleanup/stats - Retention status
pub async fn get_cleanup_stats(
    State(state): State<AdminState>,
) -> Result<Json<CleanupStats>, AppError> {
    let total_logs = state.store.count_total().await?;
    let today_logs = state.store.count_today().await?;
    let retention = state.config.load().retention.clone();

    Ok(Json(CleanupStats {
        total_logs,
        today_logs,
        retention_hours: retention.hours,
        next_cleanup: next_cleanup_at(Utc::now(), retention.cleanup_hour).to_rfc3339(),
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct TriggerCleanupRequest {
    pub hours: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct CleanupTriggered {
    pub message: String,
    pub deleted_count: u64,
}

/// POST /admin/request-logs/cleanup/trigger - Manual cleanup run
///
/// Runs the same deletion as the scheduled job, synchronously. Always
/// reports success with a count; a failed run comes back as 0 deleted.
pub async fn trigger_cleanup(
    State(state): State<AdminState>,
    body: Option<Json<TriggerCleanupRequest>>,
) -> Json<CleanupTriggered> {
    let hours = body
        .and_then(|Json(request)| request.hours)
        .unwrap_or_else(|| state.config.load().retention.hours);

    let deleted_count = state.store.delete_old_logs(hours).await;
    Json(CleanupTriggered {
        message: format!("Cleanup completed: {} logs deleted", deleted_count),
        deleted_count,
    })
}

/// Create the admin API router, bearer-token authenticated
pub fn create_admin_router(state: AdminState, config: Arc<ArcSwap<Config>>) -> Router {
    Router::new()
        .route("/admin/request-logs", get(list_request_logs))
        .route("/admin/request-logs/user", get(list_user_request_logs))
        .route("/admin/request-logs/statistics", get(get_statistics))
        .route("/admin/request-logs/cleanup/stats", get(get_cleanup_stats))
        .route("/admin/request-logs/cleanup/trigger", post(trigger_cleanup))
        .layer(middleware::from_fn_with_state(config, auth::auth_middleware))
        .with_state(state)
}
