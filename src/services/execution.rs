use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{Execution, ExecutionRequest, ExecutionStatus, ExecutionSummary, TestResult};
use crate::queue::{ExecutionJob, JobQueue, JobStatus};
use crate::repositories::ResultSink;
use crate::services::orchestrator::{Orchestrator, RequestPreview};

/// Execution record with the results recorded so far
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub execution: Execution,
    pub summary: ExecutionSummary,
    pub results: Vec<TestResult>,
}

/// Entry point for an API layer: submit, stop and inspect executions
pub struct ExecutionService {
    queue: Arc<dyn JobQueue>,
    results: Arc<dyn ResultSink>,
    orchestrator: Arc<Orchestrator>,
    /// Tokens of executions running in this process through `run_now`
    local_runs: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl ExecutionService {
    pub fn new(queue: Arc<dyn JobQueue>, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            queue,
            results: orchestrator.result_sink(),
            orchestrator,
            local_runs: Mutex::new(HashMap::new()),
        }
    }

    /// Record a pending execution and hand it to the workers
    pub async fn submit(&self, request: ExecutionRequest) -> AppResult<Uuid> {
        let execution = request.into_execution()?;
        let execution_id = execution.id;

        self.results.create_execution(&execution).await?;
        self.queue.enqueue(ExecutionJob::new(execution)).await?;

        tracing::info!(execution_id = %execution_id, "Execution submitted");
        Ok(execution_id)
    }

    /// Run an execution in this process and wait for it to finish
    pub async fn run_now(&self, request: ExecutionRequest) -> AppResult<ExecutionReport> {
        let execution = request.into_execution()?;
        self.results.create_execution(&execution).await?;

        let cancel = CancellationToken::new();
        self.local_runs
            .lock()
            .await
            .insert(execution.id, cancel.clone());

        let outcome = self.orchestrator.run(&execution, cancel).await;
        self.local_runs.lock().await.remove(&execution.id);
        outcome?;

        self.status(execution.id).await
    }

    /// Ask a running or queued execution to stop.
    ///
    /// Cases already dispatched finish; the rest are recorded as skipped.
    pub async fn stop(&self, execution_id: Uuid) -> AppResult<()> {
        if let Some(token) = self.local_runs.lock().await.get(&execution_id) {
            token.cancel();
            tracing::info!(execution_id = %execution_id, "Stop requested for local execution");
            return Ok(());
        }

        let previous = self.queue.cancel_job(execution_id).await?;
        let was_pending = previous == JobStatus::Pending;

        // Never claimed by a worker, so nothing else will finish it
        if was_pending {
            self.results
                .update_execution_status(
                    execution_id,
                    ExecutionStatus::Stopped,
                    None,
                    Some(OffsetDateTime::now_utc()),
                )
                .await?;
        }

        tracing::info!(execution_id = %execution_id, was_pending, "Stop requested");
        Ok(())
    }

    /// Report a worker failure for a queued execution.
    ///
    /// When the queue hands the job out again, the execution goes back to
    /// `pending` so its status matches the job's.
    pub async fn record_failure(
        &self,
        execution_id: Uuid,
        error: String,
        retryable: bool,
    ) -> AppResult<JobStatus> {
        let status = self.queue.fail_job(execution_id, error, retryable).await?;

        if status == JobStatus::Pending {
            self.results
                .update_execution_status(execution_id, ExecutionStatus::Pending, None, None)
                .await?;
            tracing::info!(execution_id = %execution_id, "Execution requeued for retry");
        }
        Ok(status)
    }

    /// Current status and every result recorded so far
    pub async fn status(&self, execution_id: Uuid) -> AppResult<ExecutionReport> {
        let execution = self.results.get_execution(execution_id).await?;
        let results = self.results.list_results(execution_id).await?;

        Ok(ExecutionReport {
            summary: ExecutionSummary::from_results(&results),
            execution,
            results,
        })
    }

    /// Dry run: the request a case would send, with missing variables
    pub async fn preview(
        &self,
        case_id: Uuid,
        user_id: Option<Uuid>,
        environment_id: Option<Uuid>,
        overrides: &BTreeMap<String, serde_json::Value>,
    ) -> AppResult<RequestPreview> {
        self.orchestrator
            .preview(case_id, user_id, environment_id, overrides)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::error::AppError;
    use crate::models::ExecutionType;
    use crate::queue::InMemoryQueue;
    use crate::repositories::InMemoryStore;

    fn service(store: &InMemoryStore, queue: &InMemoryQueue) -> ExecutionService {
        let store = Arc::new(store.clone());
        let orchestrator =
            Orchestrator::new(store.clone(), store.clone(), store, EngineConfig::default())
                .unwrap();
        ExecutionService::new(Arc::new(queue.clone()), Arc::new(orchestrator))
    }

    fn request(target_ids: Vec<Uuid>) -> ExecutionRequest {
        ExecutionRequest {
            execution_type: ExecutionType::Batch,
            target_ids,
            targets: Vec::new(),
            executor_id: Uuid::new_v4(),
            environment_id: None,
            override_variables: BTreeMap::new(),
            config: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_submit_creates_pending_execution_and_job() {
        let store = InMemoryStore::new();
        let queue = InMemoryQueue::new();
        let service = service(&store, &queue);

        let execution_id = service
            .submit(request(vec![Uuid::new_v4(), Uuid::new_v4()]))
            .await
            .unwrap();

        let report = service.status(execution_id).await.unwrap();
        assert_eq!(report.execution.status, ExecutionStatus::Pending);
        assert_eq!(report.execution.targets.len(), 2);
        assert!(report.results.is_empty());

        let job = queue.get_job(execution_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(queue.queue_length().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_submit_rejects_empty_request() {
        let store = InMemoryStore::new();
        let queue = InMemoryQueue::new();
        let service = service(&store, &queue);

        assert!(matches!(
            service.submit(request(Vec::new())).await,
            Err(AppError::Validation(_))
        ));
        assert_eq!(queue.queue_length().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stop_pending_execution() {
        let store = InMemoryStore::new();
        let queue = InMemoryQueue::new();
        let service = service(&store, &queue);

        let execution_id = service.submit(request(vec![Uuid::new_v4()])).await.unwrap();
        service.stop(execution_id).await.unwrap();

        let report = service.status(execution_id).await.unwrap();
        assert_eq!(report.execution.status, ExecutionStatus::Stopped);
        assert!(report.execution.finished_at.is_some());

        let job = queue.get_job(execution_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(queue.dequeue(0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stop_claimed_execution_leaves_status_to_worker() {
        let store = InMemoryStore::new();
        let queue = InMemoryQueue::new();
        let service = service(&store, &queue);

        let execution_id = service.submit(request(vec![Uuid::new_v4()])).await.unwrap();
        let claimed = queue.dequeue(0).await.unwrap().unwrap();
        assert_eq!(claimed.status, JobStatus::Running);

        service.stop(execution_id).await.unwrap();

        // The worker's cancel watcher finishes it as stopped
        let report = service.status(execution_id).await.unwrap();
        assert_eq!(report.execution.status, ExecutionStatus::Pending);
        let job = queue.get_job(execution_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_retryable_failure_requeues_execution() {
        let store = InMemoryStore::new();
        let queue = InMemoryQueue::new();
        let service = service(&store, &queue);

        let execution_id = service.submit(request(vec![Uuid::new_v4()])).await.unwrap();
        let _ = queue.dequeue(0).await.unwrap().unwrap();
        store
            .update_execution_status(execution_id, ExecutionStatus::Failed, None, None)
            .await
            .unwrap();

        let status = service
            .record_failure(execution_id, "Database error: pool closed".to_string(), true)
            .await
            .unwrap();
        assert_eq!(status, JobStatus::Pending);

        let report = service.status(execution_id).await.unwrap();
        assert_eq!(report.execution.status, ExecutionStatus::Pending);

        let job = queue.dequeue(0).await.unwrap().unwrap();
        assert_eq!(job.id, execution_id);
        assert_eq!(job.retry_count, 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_leaves_execution_failed() {
        let store = InMemoryStore::new();
        let queue = InMemoryQueue::new();
        let service = service(&store, &queue);

        let execution_id = service.submit(request(vec![Uuid::new_v4()])).await.unwrap();
        let _ = queue.dequeue(0).await.unwrap().unwrap();
        store
            .update_execution_status(execution_id, ExecutionStatus::Failed, None, None)
            .await
            .unwrap();

        let status = service
            .record_failure(execution_id, "bad input".to_string(), false)
            .await
            .unwrap();
        assert_eq!(status, JobStatus::Dead);

        let report = service.status(execution_id).await.unwrap();
        assert_eq!(report.execution.status, ExecutionStatus::Failed);
        assert!(queue.dequeue(0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stop_unknown_execution() {
        let store = InMemoryStore::new();
        let queue = InMemoryQueue::new();
        let service = service(&store, &queue);

        assert!(matches!(
            service.stop(Uuid::new_v4()).await,
            Err(AppError::NotFound(_))
        ));
    }
}
