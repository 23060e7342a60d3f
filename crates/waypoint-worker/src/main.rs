use std::sync::Arc;

use anyhow::{Context, Result};
use waypoint::{RunId, RunStatus, WorkflowEngine};
use waypoint_worker::workflows::{ClassifyDocs, UserSignup};
use waypoint_worker::{
    build_engine, init_telemetry, InMemoryRecordStore, TelemetryConfig, WorkerConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv();

    // Configure via environment variables:
    // - RUST_LOG or LOG_LEVEL: Log filter (default: "waypoint=debug,waypoint_worker=debug")
    init_telemetry(&TelemetryConfig::from_env()).context("Failed to initialize logging")?;

    if let Ok(path) = dotenv {
        tracing::info!("Loaded .env from {:?}", path);
    }

    tracing::info!("waypoint-worker starting...");

    let config = WorkerConfig::from_env();
    tracing::info!(
        max_concurrent_runs = config.engine.max_concurrent_runs,
        retention_secs = config.engine.retention.as_secs(),
        welcome_failure_rate = config.welcome_failure_rate,
        "Starting workflow engine"
    );

    let records = Arc::new(InMemoryRecordStore::new());
    let engine = build_engine(&config, records).context("Failed to register workflows")?;

    let recovered = engine
        .recover()
        .await
        .context("Failed to recover runs")?;
    if recovered > 0 {
        tracing::info!(recovered, "Recovered unfinished runs");
    }

    if let Some(email) = config.signup_email.clone() {
        let run_id = engine
            .start::<UserSignup>(email)
            .await
            .context("Failed to start signup run")?;
        tokio::spawn(report_outcome(engine.clone(), run_id));
    }

    let run_id = engine
        .start::<ClassifyDocs>(())
        .await
        .context("Failed to start classification run")?;
    tokio::spawn(follow_progress(engine.clone(), run_id));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Received shutdown signal");

    engine.shutdown().await;
    tracing::info!("Worker shutdown complete");
    Ok(())
}

/// Log a run's outcome once it is terminal
async fn report_outcome(engine: WorkflowEngine, run_id: RunId) {
    let state = match engine.get_run(run_id).await {
        Ok(handle) => handle.wait().await,
        Err(e) => Err(e),
    };

    match state {
        Ok(state) if state.status == RunStatus::Completed => {
            tracing::info!(%run_id, result = ?state.result, "Signup finished")
        }
        Ok(state) => tracing::warn!(
            %run_id,
            status = %state.status,
            error = ?state.error.map(|e| e.to_string()),
            "Signup did not complete"
        ),
        Err(e) => tracing::error!(%run_id, error = %e, "Lost track of signup run"),
    }
}

/// Log every chunk a run writes to its default channel
async fn follow_progress(engine: WorkflowEngine, run_id: RunId) {
    let mut reader = match engine.readable(run_id, None, None).await {
        Ok(reader) => reader,
        Err(e) => {
            tracing::error!(%run_id, error = %e, "Failed to open progress channel");
            return;
        }
    };

    while let Some(chunk) = reader.next_chunk().await {
        tracing::info!(
            %run_id,
            index = chunk.index,
            message = chunk.as_str().unwrap_or("<binary>"),
            "Progress"
        );
    }
}
