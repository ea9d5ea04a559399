pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod db;
pub(crate) mod repositories;
pub(crate) mod schemas;
pub(crate) mod services;
pub(crate) mod store;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::time::Duration;

use crate::core::{clock::SystemClock, config::Settings, shutdown, state::AppState, telemetry};

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let store = store::connect(&settings).await?;
    let sweep_every = Duration::from_secs(settings.scheduler().sweep_interval_seconds);
    let state = AppState::new(settings, store, Arc::new(SystemClock));

    // Overdue attempts must be settled before the first request is served.
    state.attempts().recover().await?;

    let (stop_scheduler, scheduler_rx) = shutdown::channel();
    let scheduler = tokio::spawn(tasks::scheduler::run(
        state.attempts().clone(),
        sweep_every,
        scheduler_rx,
    ));

    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        store = state.settings().store().backend.as_str(),
        "Exam attempts API listening"
    );

    let result =
        axum::serve(listener, app).with_graceful_shutdown(shutdown::shutdown_signal()).await;

    stop_scheduler.trigger();
    if let Err(err) = scheduler.await {
        tracing::error!(error = %err, "Auto-submit scheduler task failed");
    }

    result?;

    Ok(())
}
