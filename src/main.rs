mod app_state;
mod config;
mod db;
mod models;
mod routes;
mod services;

use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use app_state::AppState;
use config::AppConfig;
use services::queue::QueueManager;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing claim-verify server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_histogram!(
        "verification_processing_seconds",
        "Time to process a claim-check task"
    );
    metrics::describe_counter!(
        "verification_tasks_submitted",
        "Total claim-check tasks submitted"
    );
    metrics::describe_counter!(
        "verification_tasks_completed",
        "Total claim-check tasks completed"
    );
    metrics::describe_counter!(
        "verification_tasks_failed",
        "Total claim-check tasks that ended in error"
    );
    metrics::describe_gauge!(
        "verification_queue_depth",
        "Current number of waiting jobs in the priority queue"
    );

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run database migrations
    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize the priority queue manager and repair any state left over
    // from a previous crash before accepting traffic.
    let queue = QueueManager::new(
        db_pool.clone(),
        config.priority_queue.clone(),
        config.max_concurrent_claims,
    );
    let repaired = queue
        .ensure_consistency_in_queue()
        .await
        .expect("Failed to reconcile queue on startup");
    if repaired > 0 {
        tracing::warn!(repaired, "Reconciled stale jobs on startup");
    }

    // Create shared application state
    let state = AppState::new(db_pool, queue, config.algo_version.clone());

    // Build API routes
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/check", post(routes::check::submit_check))
        .route(
            "/api/v1/check/{task_id}",
            get(routes::check::get_task_status),
        )
        .route("/api/v1/queue/next", post(routes::queue::next_in_queue))
        .route(
            "/api/v1/queue/confirm",
            post(routes::queue::confirm_processing),
        )
        .route("/api/v1/queue/reset", post(routes::queue::reset_request))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(64 * 1024)); // 64 KB limit

    tracing::info!("Starting claim-verify on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
