use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use iris_conductor::gateway::HttpProviderGateway;
use iris_conductor::store::{MemoryStore, Stores};
use iris_conductor::{Conductor, DispatchEngine, TriggerFirer};
use iris_worker::config::{LogFormat, StoreBackend};
use iris_worker::{Consumer, SqsQueue, WorkerConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long background tasks get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;

    // --- Tracing ---
    let json = config.log_format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "iris_worker=debug,iris_conductor=debug".into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();

    tracing::info!(
        store_backend = %config.store_backend,
        queue_url = %config.queue.queue_url,
        "Loaded worker configuration"
    );

    // --- Stores ---
    let stores = match (config.store_backend, &config.database_url) {
        (StoreBackend::Postgres, Some(database_url)) => {
            let pool = iris_db::create_pool(database_url, config.database_max_connections)
                .await
                .context("Failed to connect to database")?;
            tracing::info!("Database connection pool created");

            iris_db::health_check(&pool)
                .await
                .context("Database health check failed")?;
            tracing::info!("Database health check passed");

            iris_db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;
            tracing::info!("Database migrations applied");

            Stores::postgres(pool)
        }
        (StoreBackend::Postgres, None) => anyhow::bail!("DATABASE_URL must be set"),
        (StoreBackend::Memory, _) => {
            tracing::warn!("Using in-memory stores, state is lost on restart");
            Stores::memory(Arc::new(MemoryStore::new()))
        }
    };

    // --- Engine ---
    let gateway = HttpProviderGateway::from_env().context("Failed to build provider gateway")?;
    let engine = Arc::new(DispatchEngine::new(
        stores.clone(),
        Arc::new(gateway),
        config.dispatch.clone(),
    ));
    let conductor = Conductor::new(Arc::clone(&engine), stores.clone());

    let cancel = CancellationToken::new();

    // Spawn trigger firer (fires scheduled and retried dispatches).
    let firer = TriggerFirer::new(engine, stores.triggers.clone(), config.firer.clone());
    let firer_cancel = cancel.clone();
    let firer_handle = tokio::spawn(async move {
        firer.run(firer_cancel).await;
    });

    // Spawn queue consumer.
    let queue = SqsQueue::connect(config.queue.clone()).await;
    let consumer = Consumer::new(Arc::new(queue), conductor);
    let consumer_cancel = cancel.clone();
    let consumer_handle = tokio::spawn(async move {
        consumer.run(consumer_cancel).await;
    });

    tracing::info!("Worker started");

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, stopping background tasks");
    cancel.cancel();

    if tokio::time::timeout(SHUTDOWN_GRACE, consumer_handle).await.is_err() {
        tracing::warn!("Queue consumer did not stop in time");
    }
    if tokio::time::timeout(SHUTDOWN_GRACE, firer_handle).await.is_err() {
        tracing::warn!("Trigger firer did not stop in time");
    }

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
