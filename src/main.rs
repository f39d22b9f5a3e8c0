use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;

use ara_email_gateway::config::Settings;
use ara_email_gateway::dispatch::{create_transport, WorkerPool};
use ara_email_gateway::idempotency::create_idempotency_backend;
use ara_email_gateway::message::create_message_store;
use ara_email_gateway::postgres::PostgresPool;
use ara_email_gateway::redis::RedisPool;
use ara_email_gateway::server::{create_app, AppState, Backends};
use ara_email_gateway::tasks::{ReclaimTask, RetentionTask};
use ara_email_gateway::telemetry::init_telemetry;
use ara_email_gateway::template::create_template_repository;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing (and OpenTelemetry when enabled)
    let _telemetry = init_telemetry(&settings.otel)?;
    tracing::info!("Configuration loaded");

    // Connect storage; unreachable backends leave the factories on memory
    let postgres_pool = if settings.needs_postgres() {
        connect_postgres(&settings).await
    } else {
        None
    };

    let redis_pool = if settings.idempotency.backend == "redis" {
        match RedisPool::connect(&settings.redis).await {
            Ok(pool) => {
                tracing::info!(url = %pool.url_masked(), "Redis connected");
                Some(pool)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Redis unavailable, idempotency falls back to memory");
                None
            }
        }
    } else {
        None
    };

    let backends = Backends {
        templates: create_template_repository(&settings.storage.backend, postgres_pool.clone()),
        messages: create_message_store(&settings.storage.backend, postgres_pool.clone()),
        idempotency: create_idempotency_backend(
            &settings.idempotency,
            redis_pool.clone(),
            postgres_pool.clone(),
        ),
        postgres_pool: postgres_pool.clone(),
        redis_pool,
    };

    // Create application state
    let state = AppState::new(settings.clone(), backends);
    tracing::info!("Application state initialized");

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Start dispatch workers
    let transport = create_transport(
        &settings.provider,
        std::time::Duration::from_millis(settings.dispatch.transport_timeout_ms),
    );
    let dispatcher = Arc::new(state.dispatcher(transport));
    let mut handles =
        WorkerPool::new(dispatcher, state.queue.clone(), settings.dispatch.workers)
            .spawn(&shutdown_tx);

    // Start maintenance tasks in background
    let reclaim = ReclaimTask::new(&settings.dispatch, state.queue.clone(), shutdown_tx.subscribe());
    handles.push(tokio::spawn(reclaim.run()));

    if settings.retention.enabled {
        let retention = RetentionTask::new(
            settings.retention.clone(),
            state.messages.clone(),
            state.idempotency.clone(),
            shutdown_tx.subscribe(),
        );
        handles.push(tokio::spawn(retention.run()));
    }

    // Create Axum app
    let app = create_app(state);

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler(shutdown_tx))
        .await?;

    // Wait for background tasks to finish
    tracing::info!("Waiting for workers and background tasks to finish...");
    futures::future::join_all(handles).await;

    if let Some(pool) = postgres_pool {
        pool.close().await;
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn connect_postgres(settings: &Settings) -> Option<Arc<PostgresPool>> {
    let pool = match PostgresPool::new(&settings.database).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!(error = %e, "PostgreSQL unavailable, falling back to memory storage");
            return None;
        }
    };

    if let Err(e) = pool.ensure_schema().await {
        tracing::warn!(error = %e, "PostgreSQL schema setup failed, falling back to memory storage");
        pool.close().await;
        return None;
    }

    tracing::info!(url = %pool.database_url_masked(), "PostgreSQL schema ready");
    Some(Arc::new(pool))
}

async fn shutdown_signal_handler(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }

    // Stop workers and maintenance tasks
    let _ = shutdown_tx.send(());
}
