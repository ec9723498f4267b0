use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use kbtools_api::config::ServerConfig;
use kbtools_api::state::AppState;
use kbtools_api::{app, background};
use kbtools_queue::{PgQueue, QueueConfig};
use kbtools_storage::StorageConfig;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "kbtools_api=debug,tower_http=debug".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    // --- Configuration ---
    let config = ServerConfig::from_env();
    let queue_config = QueueConfig::from_env();
    let storage_config = StorageConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = config.port,
        production = config.production,
        queue = %queue_config.queue_name,
        storage = %storage_config.backend,
        "Loaded server configuration"
    );

    // --- Queue backend ---
    let pool = queue_config
        .connect()
        .await
        .expect("Failed to connect to queue backend");
    let queue = PgQueue::new(pool);
    queue
        .run_migrations()
        .await
        .expect("Failed to run queue migrations");
    tracing::info!("Queue backend ready");

    // --- Storage ---
    let store = kbtools_storage::connect(&storage_config)
        .await
        .expect("Failed to initialize artifact storage");

    // --- App state ---
    let state = AppState::new(
        config.clone(),
        Arc::new(queue),
        store,
        &queue_config.queue_name,
    );

    // --- Abandonment sweep ---
    let shutdown = CancellationToken::new();
    let sweep_handle = tokio::spawn(background::abandonment::run(
        Arc::clone(&state.queue),
        Arc::clone(&state.queue_name),
        Arc::clone(&state.tracker),
        config.abandonment_check_interval,
        shutdown.clone(),
    ));

    let app = app::build(state);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    let graceful = shutdown.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move { graceful.cancelled().await })
        .into_future();

    // Open responses get a bounded window to finish once shutdown starts.
    let grace = Duration::from_secs(config.shutdown_timeout_secs);
    let drain_deadline = async {
        shutdown.cancelled().await;
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = server => result.expect("Server error"),
        () = drain_deadline => {
            tracing::warn!(grace_secs = grace.as_secs(), "Shutdown grace period elapsed, dropping open connections");
        }
    }

    // --- Post-shutdown cleanup ---
    let _ = tokio::time::timeout(Duration::from_secs(5), sweep_handle).await;
    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
