// ABOUTME: Server assembly: workers, broadcaster maintenance, axum serve
// ABOUTME: Shuts down on ctrl-c; workers abort with the process

use anyhow::Context;
use std::sync::Arc;

use crate::api::{routes, AppState};
use crate::cli::config::Config;
use crate::engine::{TaskExecutor, WorkerPool};

/// Run the service until interrupted.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let state = AppState::new(config);

    let executor = Arc::new(TaskExecutor::new(
        state.registry.clone(),
        state.broadcaster.clone(),
        state.sessions.clone(),
        state.controller.clone(),
        (*state.config).clone(),
    ));
    let _pool = WorkerPool::spawn(
        executor,
        state.registry.clone(),
        state.config.task.max_concurrent,
    );

    tokio::spawn(state.broadcaster.clone().run_maintenance());

    let addr = format!("{}:{}", state.config.api.host, state.config.api.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(
        addr,
        workers = state.config.task.max_concurrent,
        simulation = state.config.simulation.enabled,
        "webpilot listening"
    );

    let app = routes::router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown signal received");
}
