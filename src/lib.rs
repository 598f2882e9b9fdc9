pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod db;
pub(crate) mod queue;
pub(crate) mod repositories;
pub(crate) mod schemas;
pub(crate) mod services;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use crate::core::{bootstrap, config::Settings, shutdown, telemetry};

/// HTTP API with the deadline scheduler running in-process.
pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings, "api")?;
    core::metrics::init(&settings)?;

    let (state, receiver) = bootstrap::build_state(settings, true).await?;
    let (_shutdown_tx, shutdown_rx) = shutdown::shutdown_channel();

    let scheduler = tokio::spawn(tasks::scheduler::run_deadlines(
        state.clone(),
        receiver,
        shutdown_rx.clone(),
    ));

    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        "Quizmaster API listening"
    );

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::wait_for(shutdown_rx))
        .await;

    match scheduler.await {
        Ok(Err(err)) => tracing::error!(error = %err, "Deadline scheduler failed"),
        Err(err) => tracing::error!(error = %err, "Deadline scheduler join failed"),
        Ok(Ok(())) => {}
    }

    bootstrap::teardown(&state).await;
    result?;

    Ok(())
}

/// Grading workers plus the maintenance sweeps.
pub async fn run_worker() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings, "worker")?;
    core::metrics::init(&settings)?;

    let (state, _) = bootstrap::build_state(settings, false).await?;
    let (_shutdown_tx, shutdown_rx) = shutdown::shutdown_channel();

    let result = tasks::scheduler::run_workers(state.clone(), shutdown_rx).await;

    bootstrap::teardown(&state).await;
    result?;

    Ok(())
}

/// Standalone deadline scheduler; picks up entries written by API processes via resync.
pub async fn run_scheduler() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings, "scheduler")?;
    core::metrics::init(&settings)?;

    let (state, receiver) = bootstrap::build_state(settings, true).await?;
    let (_shutdown_tx, shutdown_rx) = shutdown::shutdown_channel();

    let result = tasks::scheduler::run_deadlines(state.clone(), receiver, shutdown_rx).await;

    bootstrap::teardown(&state).await;
    result?;

    Ok(())
}
