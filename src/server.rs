use anyhow::Result;
use arc_swap::ArcSwap;
use axum::{extract::DefaultBodyLimit, middleware, routing::get, Router};
use std::{net::SocketAddr, path::Path, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    capture::{capture_middleware, CapturePolicy, CaptureState},
    cleanup,
    config::Config,
    handlers::{
        self,
        admin_api::AdminState,
    },
    signals::setup_signal_handlers,
    store::{self, RequestLogStore},
};

/// Start the request log server
///
/// This function:
/// 1. Initializes tracing/logging
/// 2. Opens the SQLite pool and runs migrations
/// 3. Starts the background writer and the scheduled cleanup task
/// 4. Serves requests with graceful shutdown support
pub async fn start_server(config: Config, config_path: &Path) -> Result<()> {
    let _log_guard = crate::init_server_tracing(&config.server);
    tracing::info!("reqlog starting...");

    tracing::info!(database = %config.database.path, "Opening request log database");
    let pool = store::open_pool(&config.database.path).await?;

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

    let log_store = RequestLogStore::new(pool.clone(), config.capture.buffer_size);
    tracing::info!(
        buffer = config.capture.buffer_size,
        "Request log writer initialized"
    );

    // Wrap config in ArcSwap for atomic reload support
    let config_swap = Arc::new(ArcSwap::from_pointee(config.clone()));
    let policy = Arc::new(ArcSwap::from_pointee(CapturePolicy::from_config(
        &config.capture,
    )));

    // Scheduled retention enforcement
    let cleanup_handle = cleanup::start_cleanup_task(log_store.clone(), config_swap.clone());

    // Setup signal handlers (SIGTERM, SIGINT for shutdown; SIGHUP for reload)
    let (shutdown_tx, signal_handle) = setup_signal_handlers(
        config_path.to_path_buf(),
        config_swap.clone(),
        policy.clone(),
    );
    let mut shutdown_rx = shutdown_tx.subscribe();

    // Build the Axum router
    let app = create_router(config_swap.clone(), log_store, policy);

    // Create socket address
    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    info!("Starting reqlog on {}", addr);
    info!(
        "Capture policy: {} tracked methods, {} excluded paths, retention {}h (cleanup at {:02}:00 UTC)",
        config.capture.tracked_methods.len(),
        config.capture.excluded_paths.len(),
        config.retention.hours,
        config.retention.cleanup_hour,
    );

    // Bind to address
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Serve with graceful shutdown; connect info feeds the socket-peer
    // fallback of the client IP extraction
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown_rx.recv().await;
        info!("Shutdown signal received, draining connections...");
    })
    .await?;

    cleanup_handle.abort();
    signal_handle.await?;
    info!("Server stopped gracefully");

    Ok(())
}

/// Create the Axum router with all routes and middleware
pub fn create_router(
    config: Arc<ArcSwap<Config>>,
    log_store: RequestLogStore,
    policy: Arc<ArcSwap<CapturePolicy>>,
) -> Router {
    let admin_state = AdminState {
        store: log_store.clone(),
        config: config.clone(),
    };

    // Public endpoints (no auth required)
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .with_state(admin_state.clone());

    // Authenticated admin routes
    let admin_routes = handlers::admin_api::create_admin_router(admin_state, config);

    let capture_state = CaptureState {
        store: log_store,
        policy,
    };

    public_routes
        .merge(admin_routes)
        // Limit request body size to 10MB to prevent memory exhaustion
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        // Outermost, so capture sees every request and the full latency
        .layer(middleware::from_fn_with_state(
            capture_state,
            capture_middleware,
        ))
}
