use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use serval_exec::error::AppResult;
use serval_exec::models::ExecutionSummary;
use serval_exec::queue::{ExecutionJob, JobQueue, JobResult, JobStatus};
use serval_exec::state::AppState;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Runs claimed execution jobs through the orchestrator
pub struct JobExecutor {
    state: Arc<AppState>,
}

impl JobExecutor {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Run the job's execution to a terminal status and summarise it
    pub async fn execute(&self, job: &ExecutionJob) -> AppResult<JobResult> {
        let execution_id = job.execution.id;
        let cancel = CancellationToken::new();
        let watcher_done = CancellationToken::new();

        let watcher = tokio::spawn(watch_for_cancel(
            self.state.job_queue.clone(),
            job.id,
            cancel.clone(),
            watcher_done.clone(),
        ));

        let outcome = self.state.orchestrator.run(&job.execution, cancel).await;

        watcher_done.cancel();
        let _ = watcher.await;

        let status = outcome?;
        let results = self
            .state
            .orchestrator
            .result_sink()
            .list_results(execution_id)
            .await?;

        Ok(JobResult {
            status,
            summary: ExecutionSummary::from_results(&results),
        })
    }

    /// Whether a failed job can safely run again from scratch
    pub async fn has_recorded_results(&self, execution_id: Uuid) -> bool {
        match self
            .state
            .orchestrator
            .result_sink()
            .list_results(execution_id)
            .await
        {
            Ok(results) => !results.is_empty(),
            Err(_) => true,
        }
    }
}

/// Cancel `cancel` once the job is marked cancelled in the queue
async fn watch_for_cancel(
    queue: Arc<dyn JobQueue>,
    job_id: Uuid,
    cancel: CancellationToken,
    done: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = done.cancelled() => return,
            _ = tokio::time::sleep(CANCEL_POLL_INTERVAL) => {}
        }

        match queue.get_job(job_id).await {
            Ok(Some(job)) if job.status == JobStatus::Cancelled => {
                tracing::info!(job_id = %job_id, "Cancellation observed, stopping execution");
                cancel.cancel();
                return;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to poll job status");
            }
        }
    }
}
