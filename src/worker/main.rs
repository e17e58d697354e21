mod executor;

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio::sync::watch;

use serval_exec::config::Config;
use serval_exec::state::AppState;

use executor::JobExecutor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!("Starting Serval execution worker...");

    let config = Config::from_env().context("Failed to load configuration")?;
    let poll_seconds = config.worker_poll_seconds;

    tracing::info!("Connecting to databases...");
    let state = AppState::new(config)
        .await
        .context("Failed to initialize application state")?;
    let state = Arc::new(state);
    tracing::info!(
        mongo_mirror = state.mongo_client.is_some(),
        "Database connections established"
    );

    // Set up graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received, stopping worker...");
        let _ = shutdown_tx.send(true);
    });

    let executor = JobExecutor::new(state.clone());

    tracing::info!("Worker started, waiting for jobs...");
    loop {
        if *shutdown_rx.borrow() {
            tracing::info!("Shutdown requested, exiting worker loop");
            break;
        }

        match state.job_queue.dequeue(poll_seconds).await {
            Ok(Some(job)) => {
                let job_id = job.id;
                tracing::info!(
                    job_id = %job_id,
                    execution_type = job.execution.execution_type.as_str(),
                    targets = job.execution.targets.len(),
                    "Processing job"
                );

                match executor.execute(&job).await {
                    Ok(result) => {
                        if let Err(e) = state.job_queue.complete_job(job_id, result).await {
                            tracing::error!(job_id = %job_id, error = %e, "Failed to mark job as complete");
                        }
                    }
                    Err(e) => {
                        // A rerun would collide with results already written
                        let retryable =
                            e.is_retryable() && !executor.has_recorded_results(job_id).await;
                        tracing::error!(
                            job_id = %job_id,
                            error = %e,
                            retryable,
                            "Job failed"
                        );
                        if let Err(e) = state
                            .executions
                            .record_failure(job_id, e.to_string(), retryable)
                            .await
                        {
                            tracing::error!(job_id = %job_id, error = %e, "Failed to mark job as failed");
                        }
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(error = %e, "Error dequeuing job");
                // Brief sleep on error to prevent tight loop
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }

    tracing::info!("Worker shutdown complete");
    Ok(())
}

/// `LOG_FORMAT=json` switches to structured JSON lines
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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
