//! End-to-end capture pipeline tests: middleware -> writer task -> store.

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    http::Request,
    middleware,
    routing::post,
    Router,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use reqlog::capture::{capture_middleware, CapturePolicy, CaptureState};
use reqlog::config::{AdminConfig, AdminTokenConfig, CaptureConfig, Config};
use reqlog::error::AppError;
use reqlog::store::{self, RequestLogStore, REDACTION_MARKER};

async fn test_store(dir: &tempfile::TempDir) -> (RequestLogStore, SqlitePool) {
    let db_path = dir.path().join("request_logs.db");
    let pool = store::open_pool(db_path.to_str().unwrap()).await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let log_store = RequestLogStore::new(pool.clone(), 64);
    (log_store, pool)
}

fn capture_app(log_store: RequestLogStore, config: CaptureConfig) -> Router {
    let state = CaptureState {
        store: log_store,
        policy: Arc::new(ArcSwap::from_pointee(CapturePolicy::from_config(&config))),
    };

    Router::new()
        .route(
            "/widgets",
            post(|| async { "created" }).get(|| async { "listed" }),
        )
        .route(
            "/boom",
            post(|| async { AppError::InternalError("downstream exploded".to_string()) }),
        )
        .route("/api/track/event", post(|| async { "accepted" }))
        .layer(middleware::from_fn_with_state(state, capture_middleware))
}

async fn wait_for_total(log_store: &RequestLogStore, expected: i64) {
    for _ in 0..200 {
        if log_store.count_total().await.unwrap() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {} log records", expected);
}

#[tokio::test]
async fn tracked_post_is_logged_with_redaction_and_client_ip() {
    let dir = tempfile::tempdir().unwrap();
    let (log_store, _pool) = test_store(&dir).await;
    let app = capture_app(log_store.clone(), CaptureConfig::default());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/widgets?source=ui")
                .header("content-type", "application/json")
                .header("x-forwarded-for", "10.0.0.9, 70.1.2.3")
                .header("user-agent", "pipeline-test")
                .body(Body::from(r#"{"password":"hunter2","email":"a@b.com"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    wait_for_total(&log_store, 1).await;
    let (logs, total) = log_store.get_request_logs(1, 50).await.unwrap();
    assert_eq!(total, 1);

    let record = &logs[0];
    assert_eq!(record.method, "POST");
    assert_eq!(record.path, "/widgets?source=ui");
    assert_eq!(record.status_code, 200);
    assert!(record.response_time_ms >= 0);
    assert_eq!(record.ip_address, "10.0.0.9");
    assert_eq!(record.user_agent.as_deref(), Some("pipeline-test"));
    assert_eq!(record.error_message, None);

    let body: serde_json::Value =
        serde_json::from_str(record.request_body.as_deref().unwrap()).unwrap();
    assert_eq!(body["password"], REDACTION_MARKER);
    assert_eq!(body["email"], "a@b.com");

    let query: serde_json::Value =
        serde_json::from_str(record.query_params.as_deref().unwrap()).unwrap();
    assert_eq!(query["source"], "ui");
}

#[tokio::test]
async fn untracked_get_produces_no_record() {
    let dir = tempfile::tempdir().unwrap();
    let (log_store, _pool) = test_store(&dir).await;
    let app = capture_app(log_store.clone(), CaptureConfig::default());

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/widgets")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // A tracked request afterwards pins down the writer: once it has
    // landed, the GET would have landed too if it were ever queued.
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/widgets")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    wait_for_total(&log_store, 1).await;
    let (logs, total) = log_store.get_request_logs(1, 50).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(logs[0].method, "POST");
}

#[tokio::test]
async fn excluded_path_is_never_logged() {
    let dir = tempfile::tempdir().unwrap();
    let (log_store, _pool) = test_store(&dir).await;
    let config = CaptureConfig {
        excluded_paths: vec!["/track".to_string()],
        ..CaptureConfig::default()
    };
    let app = capture_app(log_store.clone(), config);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/track/event?source=web")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/widgets")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    wait_for_total(&log_store, 1).await;
    let (logs, _) = log_store.get_request_logs(1, 50).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].path, "/widgets");
}

#[tokio::test]
async fn error_response_records_message_and_status() {
    let dir = tempfile::tempdir().unwrap();
    let (log_store, _pool) = test_store(&dir).await;
    let app = capture_app(log_store.clone(), CaptureConfig::default());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/boom")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), 500);

    wait_for_total(&log_store, 1).await;
    let (logs, _) = log_store.get_request_logs(1, 50).await.unwrap();

    let record = &logs[0];
    assert_eq!(record.status_code, 500);
    assert_eq!(record.request_body, None);
    let message = record.error_message.as_deref().unwrap();
    assert!(message.contains("downstream exploded"), "got: {message}");
}

#[tokio::test]
async fn authenticated_request_is_attributed_to_principal() {
    let dir = tempfile::tempdir().unwrap();
    let (log_store, _pool) = test_store(&dir).await;

    let config = Config {
        admin: AdminConfig {
            tokens: vec![AdminTokenConfig {
                token: "sk-admin-test".to_string(),
                name: "ops".to_string(),
                enabled: true,
            }],
        },
        ..Config::default()
    };
    let config_swap = Arc::new(ArcSwap::from_pointee(config.clone()));

    let capture_state = CaptureState {
        store: log_store.clone(),
        policy: Arc::new(ArcSwap::from_pointee(CapturePolicy::from_config(
            &config.capture,
        ))),
    };

    let app = Router::new()
        .route("/secure", post(|| async { "ok" }))
        .layer(middleware::from_fn_with_state(
            config_swap,
            reqlog::auth::auth_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            capture_state,
            capture_middleware,
        ));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/secure")
                .header("Authorization", "Bearer sk-admin-test")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    wait_for_total(&log_store, 1).await;
    let (logs, _) = log_store.get_request_logs(1, 50).await.unwrap();
    assert_eq!(logs[0].user_id.as_deref(), Some("ops"));

    let (user_logs, user_total) = log_store.get_user_request_logs("ops", 1, 50).await.unwrap();
    assert_eq!(user_total, 1);
    assert_eq!(user_logs[0].path, "/secure");
}

#[tokio::test]
async fn delete_old_logs_is_age_bounded_and_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let (log_store, pool) = test_store(&dir).await;

    insert_aged_record(&pool, 25).await;
    insert_aged_record(&pool, 1).await;

    let deleted = log_store.delete_old_logs(24).await;
    assert_eq!(deleted, 1);

    let (logs, total) = log_store.get_request_logs(1, 50).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(logs.len(), 1);

    // No intervening inserts: a second run deletes nothing
    let deleted = log_store.delete_old_logs(24).await;
    assert_eq!(deleted, 0);
}

#[tokio::test]
async fn statistics_reflect_population() {
    let dir = tempfile::tempdir().unwrap();
    let (log_store, pool) = test_store(&dir).await;

    insert_record(&pool, 200, 10).await;
    insert_record(&pool, 404, 20).await;
    insert_record(&pool, 500, 25).await;

    let stats = log_store.get_statistics().await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.today, 3);
    assert_eq!(stats.errors, 2);
    // mean of 10, 20, 25 is 18.33 -> rounds to 18
    assert_eq!(stats.average_response_time, 18);
}

async fn insert_aged_record(pool: &SqlitePool, age_hours: i64) {
    let created = chrono::Utc::now() - chrono::Duration::hours(age_hours);
    sqlx::query(
        "INSERT INTO request_logs \
         (method, path, status_code, response_time_ms, ip_address, created_at, date) \
         VALUES ('POST', '/users', 201, 12, '127.0.0.1', ?1, ?2)",
    )
    .bind(created.timestamp_millis())
    .bind(created.format("%Y-%m-%d").to_string())
    .execute(pool)
    .await
    .unwrap();
}

async fn insert_record(pool: &SqlitePool, status_code: i64, response_time_ms: i64) {
    let created = chrono::Utc::now();
    sqlx::query(
        "INSERT INTO request_logs \
         (method, path, status_code, response_time_ms, ip_address, created_at, date) \
         VALUES ('POST', '/users', ?1, ?2, '127.0.0.1', ?3, ?4)",
    )
    .bind(status_code)
    .bind(response_time_ms)
    .bind(created.timestamp_millis())
    .bind(created.format("%Y-%m-%d").to_string())
    .execute(pool)
    .await
    .unwrap();
}
