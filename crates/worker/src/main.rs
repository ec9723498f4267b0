use std::sync::Arc;

use kbtools_pipeline::{KicadGenerator, PipelineConfig};
use kbtools_queue::{PgQueue, QueueConfig};
use kbtools_storage::StorageConfig;
use kbtools_worker::config::WorkerConfig;
use kbtools_worker::processor::TaskProcessor;
use kbtools_worker::server::WorkerServer;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "kbtools_worker=debug,kbtools_pipeline=debug".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    // Panics inside tasks are caught and retried; the hook makes sure the
    // stack is in the log before that happens.
    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::force_capture();
        tracing::error!(panic = %info, %backtrace, "Panic in worker");
    }));

    // --- Configuration ---
    let worker_config = WorkerConfig::from_env();
    let queue_config = QueueConfig::from_env();
    let storage_config = StorageConfig::from_env();
    let pipeline_config = PipelineConfig::from_env();
    tracing::info!(
        queue = %worker_config.queue_name,
        concurrency = worker_config.concurrency,
        storage = %storage_config.backend,
        "Loaded worker configuration"
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

    // --- Server ---
    let broker = Arc::new(queue);
    let processor = TaskProcessor::new(
        broker.clone(),
        Arc::new(KicadGenerator::new(pipeline_config)),
        store,
    );
    let server = WorkerServer::new(worker_config, broker, processor);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    server
        .run(shutdown)
        .await
        .expect("Failed to register worker server");

    tracing::info!("Worker shut down");
}

/// Wait for SIGINT or SIGTERM.
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
        () = ctrl_c => tracing::info!("Received SIGINT, stopping worker"),
        () = terminate => tracing::info!("Received SIGTERM, stopping worker"),
    }
}
